//! Command-line interface for svcwarden.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::constants::{DEFAULT_GRACEFUL_TIMEOUT_SECS, DEFAULT_SERVICE_ROOT};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcwarden.
#[derive(Parser)]
#[command(name = "svcwarden", version, author)]
#[command(about = "Start, supervise, and stop a single backend service process", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcwarden.
#[derive(Subcommand)]
pub enum Commands {
    /// Launch the artifact detached and record its PID.
    Start {
        /// Artifact to run; relative paths resolve against the service root.
        artifact: PathBuf,

        /// Directory holding the artifact, `.env`, PID file, and log.
        #[arg(default_value = DEFAULT_SERVICE_ROOT)]
        service_root: PathBuf,

        /// Environment variable that must be set and non-empty (repeatable).
        #[arg(short, long = "require", value_name = "NAME")]
        require: Vec<String>,

        /// Launch manifest to use instead of `<service-root>/launch.yaml`.
        #[arg(short, long, value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Stay attached until the service exits.
        #[arg(long)]
        foreground: bool,

        /// Seconds the process must survive before the start counts as successful.
        #[arg(long, value_name = "SECS")]
        startup_grace: Option<f64>,
    },

    /// Stop the service, escalating to SIGKILL if needed.
    Stop {
        /// Artifact file name used to find the process when the PID file is unusable.
        artifact_name: String,

        /// Directory holding the PID file.
        #[arg(default_value = DEFAULT_SERVICE_ROOT)]
        service_root: PathBuf,

        /// Seconds to wait after SIGTERM before sending SIGKILL.
        #[arg(short, long, value_name = "SECS", default_value_t = DEFAULT_GRACEFUL_TIMEOUT_SECS)]
        timeout: u64,

        /// Overall time limit for the stop; exceeding it fails the stop.
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Regular expression matched against command lines instead of the artifact name.
        #[arg(long, value_name = "REGEX")]
        pattern: Option<String>,
    },

    /// Report whether the service is running.
    Status {
        /// Artifact file name used to find the process when the PID file is unusable.
        artifact_name: String,

        /// Directory holding the PID file.
        #[arg(default_value = DEFAULT_SERVICE_ROOT)]
        service_root: PathBuf,

        /// Regular expression matched against command lines instead of the artifact name.
        #[arg(long, value_name = "REGEX")]
        pattern: Option<String>,

        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,
    },

    /// Show the tail of the service log.
    Logs {
        /// Directory holding the log file.
        #[arg(default_value = DEFAULT_SERVICE_ROOT)]
        service_root: PathBuf,

        /// Number of lines to show.
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
