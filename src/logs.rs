//! Append-only log sink for the managed process.
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use chrono::Local;

/// Writable handles for the child's stdout and stderr, both appending to one file.
#[derive(Debug)]
pub struct LogSink {
    /// Handle for stdout.
    pub stdout: File,
    /// Handle for stderr.
    pub stderr: File,
}

/// Opens (creating if needed) the log file in append mode.
pub fn open_log_sink(path: &Path) -> io::Result<LogSink> {
    let stdout = OpenOptions::new().create(true).append(true).open(path)?;
    let stderr = stdout.try_clone()?;
    Ok(LogSink { stdout, stderr })
}

/// Appends a timestamped svcwarden line, separating launches in the shared log.
pub fn append_marker(path: &Path, message: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "[{}] svcwarden: {}",
        Local::now().to_rfc3339(),
        message
    )
}

/// Returns the last `lines` lines of the log file.
///
/// # Arguments
/// * `path` - The log file.
/// * `lines` - The number of lines to return.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
