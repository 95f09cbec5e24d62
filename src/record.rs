//! Durable PID record for the managed process.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::RecordError;
use crate::runtime::ServiceLayout;

/// What the PID file currently says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// No PID file exists.
    Absent,
    /// The file exists but does not hold a positive decimal PID.
    Invalid(String),
    /// The file names this PID.
    Valid(u32),
}

impl RecordState {
    /// The recorded PID, if usable.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Valid(pid) => Some(*pid),
            _ => None,
        }
    }
}

/// Plain-text PID file: the whole content is the decimal PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    path: PathBuf,
}

impl ProcessRecord {
    /// Record stored at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record stored at the layout's PID file location.
    pub fn for_layout(layout: &ServiceLayout) -> Self {
        Self::new(layout.pid_file())
    }

    /// Returns the PID file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record. Unparseable content is reported as [`RecordState::Invalid`].
    pub fn read(&self) -> Result<RecordState, RecordError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(RecordState::Absent),
            Err(source) => {
                return Err(RecordError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        Ok(parse_pid(&content))
    }

    /// Writes `pid`, replacing any previous content.
    pub fn write(&self, pid: u32) -> Result<(), RecordError> {
        fs::write(&self.path, pid.to_string()).map_err(|source| RecordError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!("Recorded PID {pid} in {}", self.path.display());
        Ok(())
    }

    /// Deletes the record. Returns `false` if it was already gone.
    pub fn remove(&self) -> Result<bool, RecordError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(RecordError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn parse_pid(content: &str) -> RecordState {
    let trimmed = content.trim();
    match trimmed.parse::<u32>() {
        Ok(pid) if pid > 0 => RecordState::Valid(pid),
        _ => RecordState::Invalid(trimmed.chars().take(32).collect()),
    }
}
