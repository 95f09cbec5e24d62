//! Runtime paths for a managed service.
use std::path::{Path, PathBuf};

use crate::constants::{ENV_FILE_NAME, LOG_FILE_NAME, MANIFEST_FILE_NAME, PID_FILE_NAME};

/// File locations under a service root (artifact, env file, PID record, log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLayout {
    root: PathBuf,
}

impl ServiceLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Service root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// PID record location.
    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE_NAME)
    }

    /// Log sink location.
    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE_NAME)
    }

    /// Environment file location.
    pub fn env_file(&self) -> PathBuf {
        self.root.join(ENV_FILE_NAME)
    }

    /// Default launch manifest location.
    pub fn manifest_file(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    /// Resolves an artifact path; relative paths are taken from the service root.
    pub fn resolve_artifact(&self, artifact: &Path) -> PathBuf {
        if artifact.is_absolute() {
            artifact.to_path_buf()
        } else {
            self.root.join(artifact)
        }
    }
}
