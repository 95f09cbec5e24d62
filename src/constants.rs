//! Constants and configuration values for svcwarden.
//!
//! This module centralizes file names, timing values, and runtime defaults used
//! by the launcher and the supervisor.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Service root used when none is given on the command line.
pub const DEFAULT_SERVICE_ROOT: &str = "/opt/app";

/// Name of the PID record stored in the service root.
/// Contains the decimal PID of the managed process and nothing else.
pub const PID_FILE_NAME: &str = "app.pid";

/// Name of the append-only log collecting the managed process's stdout/stderr.
pub const LOG_FILE_NAME: &str = "app.log";

/// Name of the environment file read before every launch.
pub const ENV_FILE_NAME: &str = ".env";

/// Name of the optional launch manifest stored in the service root.
pub const MANIFEST_FILE_NAME: &str = "launch.yaml";

// ============================================================================
// Runtime Defaults
// ============================================================================

/// Extension that selects the JVM runtime when no manifest overrides it.
pub const JAR_EXTENSION: &str = "jar";

/// Program used to run `.jar` artifacts.
pub const DEFAULT_JAVA_PROGRAM: &str = "java";

/// JVM flags passed before `-jar <artifact>`.
pub const DEFAULT_JAVA_OPTS: &[&str] = &[
    "-Xmx512m",
    "-Xms256m",
    "-Djava.security.egd=file:/dev/./urandom",
];

/// Substrings that mark an environment variable as sensitive.
/// Values of matching keys are never logged, only their length.
pub const SENSITIVE_KEY_MARKERS: &[&str] = &["SECRET", "PASSWORD", "KEY", "TOKEN"];

// ============================================================================
// Process Management Timing
// ============================================================================

/// Time given to a freshly spawned process before checking it is still alive.
pub const STARTUP_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Default time to wait for SIGTERM to take effect before escalating.
pub const DEFAULT_GRACEFUL_TIMEOUT_SECS: u64 = 30;

/// Interval between liveness polls while waiting for a graceful exit.
pub const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Emit a progress notice every this many polls during a graceful wait.
pub const PROGRESS_NOTICE_EVERY: u64 = 5;

/// Delay between SIGKILL and the confirming liveness probe.
pub const FORCE_KILL_SETTLE_DELAY: Duration = Duration::from_secs(2);

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit code for a failed command or an interrupted foreground run.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code reported by `status` when the service is not running.
pub const EXIT_NOT_RUNNING: i32 = 3;
