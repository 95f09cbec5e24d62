//! svcwarden starts, supervises, and stops a single backend service process on
//! Unix-like systems. It validates the service environment before launch, records the
//! PID of the detached process, and stops it with an escalating SIGTERM/SIGKILL
//! protocol that falls back to a process-table search when the PID record is unusable.

/// CLI interface.
pub mod cli;

/// `.env` parsing, required-variable validation, and launch manifests.
pub mod config;

/// Shared constants.
pub mod constants;

/// Error handling.
pub mod error;

/// Detached launch of the service artifact.
pub mod launcher;

/// Logs management.
pub mod logs;

/// Liveness probing and command-line search over the process table.
pub mod probe;

/// PID record persistence.
pub mod record;

/// Filesystem layout of a service root.
pub mod runtime;

/// Cleanup on termination requests.
pub mod signal;

/// Stop and status protocol.
pub mod supervisor;
