//! Error handling for svcwarden.
use std::path::PathBuf;

use thiserror::Error;

use crate::supervisor::TerminationPhase;

/// Errors raised while loading the environment file or the launch manifest.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the environment file.
    #[error("Failed to read env file {path}: {source}")]
    EnvFileRead {
        /// Location of the env file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error reading the launch manifest.
    #[error("Failed to read launch manifest {path}: {source}")]
    ManifestRead {
        /// Location of the manifest.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML in the launch manifest.
    #[error("Invalid YAML in launch manifest {path}: {source}")]
    ManifestParse {
        /// Location of the manifest.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_yaml::Error,
    },
}

/// A single failed environment requirement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvViolation {
    /// The variable is not defined in the env file.
    #[error("{0} is not set")]
    Missing(String),

    /// The variable is defined but has no value.
    #[error("{0} is empty")]
    Empty(String),

    /// The variable is shorter than the declared minimum.
    #[error("{name} is too short (minimum {min} characters, got {actual})")]
    TooShort {
        /// Variable name.
        name: String,
        /// Declared minimum length.
        min: usize,
        /// Observed length.
        actual: usize,
    },
}

/// Errors for PID record file operations.
///
/// Unparseable contents are not an error; they surface as [`crate::record::RecordState::Invalid`].
#[derive(Debug, Error)]
pub enum RecordError {
    /// Error reading the PID file.
    #[error("Failed to read PID file {path}: {source}")]
    Read {
        /// Location of the PID file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error writing the PID file.
    #[error("Failed to write PID file {path}: {source}")]
    Write {
        /// Location of the PID file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error removing the PID file.
    #[error("Failed to remove PID file {path}: {source}")]
    Remove {
        /// Location of the PID file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that end a launch before a healthy process is confirmed.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The environment file is absent.
    #[error("Environment file not found: {0} (the deployment must create it first)")]
    EnvFileMissing(PathBuf),

    /// The artifact to run is absent.
    #[error("Artifact not found: {0} (deploy the artifact first)")]
    ArtifactMissing(PathBuf),

    /// One or more required environment variables are invalid.
    #[error("Environment validation failed: {}", format_violations(.0))]
    Validation(Vec<EnvViolation>),

    /// The OS refused to create the process.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        /// The program that failed to start.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The process started but was gone before the settle delay elapsed.
    #[error("Process {pid} exited immediately ({status}); see {log}")]
    ExitedImmediately {
        /// PID of the short-lived process.
        pid: u32,
        /// Human-readable exit status.
        status: String,
        /// Log file holding the process output.
        log: PathBuf,
    },

    /// Error loading configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error persisting the PID record.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Error opening the log sink or waiting on the child.
    #[error("I/O error during launch: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that prevent a single PID from being confirmed dead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationError {
    /// The caller lacks permission to probe or signal the process.
    #[error("Permission denied for PID {pid} during {phase} phase")]
    PermissionDenied {
        /// Target PID.
        pid: u32,
        /// Phase in which the permission check failed.
        phase: TerminationPhase,
    },

    /// The process is still alive after SIGKILL and the settle delay.
    #[error("PID {pid} survived SIGKILL")]
    SurvivedKill {
        /// Target PID.
        pid: u32,
    },

    /// The caller-imposed deadline elapsed before termination was confirmed.
    #[error("Deadline exceeded while waiting for PID {pid} to exit")]
    DeadlineExceeded {
        /// Target PID.
        pid: u32,
    },

    /// Any other errno returned while probing or signalling.
    #[error("Failed to signal PID {pid}: {errno}")]
    Signal {
        /// Target PID.
        pid: u32,
        /// The raw errno returned by the OS.
        errno: nix::errno::Errno,
    },
}

impl TerminationError {
    /// PID the error refers to.
    pub fn pid(&self) -> u32 {
        match self {
            Self::PermissionDenied { pid, .. }
            | Self::SurvivedKill { pid }
            | Self::DeadlineExceeded { pid }
            | Self::Signal { pid, .. } => *pid,
        }
    }
}

/// Errors raised by the read-only status query.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Failed to read the PID file.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Probing the process failed.
    #[error(transparent)]
    Probe(#[from] TerminationError),
}

fn format_violations(violations: &[EnvViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
