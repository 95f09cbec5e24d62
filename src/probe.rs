//! Narrow views onto the OS process table: a liveness probe and a command-line search.
//!
//! Nothing here is cached; every call observes the table afresh.
use std::collections::HashSet;

use nix::{errno::Errno, sys::signal, unistd::Pid};
use regex::Regex;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::debug;

/// Converts a PID into a signal target that addresses exactly one process.
///
/// `0` and values above `i32::MAX` would address process groups or wrap negative.
pub(crate) fn signal_target(pid: u32) -> Option<Pid> {
    if pid == 0 {
        return None;
    }
    i32::try_from(pid).ok().map(Pid::from_raw)
}

/// Returns whether `pid` currently identifies a running process.
///
/// Uses `kill(pid, 0)`. `ESRCH` means not alive; zombies count as not alive.
/// Any other errno (notably `EPERM`) is returned to the caller.
pub fn is_alive(pid: u32) -> Result<bool, Errno> {
    let Some(target) = signal_target(pid) else {
        return Ok(false);
    };

    match signal::kill(target, None) {
        Ok(()) => Ok(!is_zombie(pid)),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };

    // The state field follows the parenthesised command name.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Matches process command lines against the managed artifact.
#[derive(Debug, Clone)]
pub struct ProcessPattern {
    regex: Regex,
}

impl ProcessPattern {
    /// Matches command lines containing `artifact_name` literally.
    pub fn literal(artifact_name: &str) -> Result<Self, regex::Error> {
        Self::regex(&regex::escape(artifact_name))
    }

    /// Matches command lines against a caller-supplied regular expression.
    pub fn regex(expression: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(expression)?,
        })
    }

    /// Whether `command_line` references the artifact.
    pub fn matches(&self, command_line: &str) -> bool {
        self.regex.is_match(command_line)
    }

    /// The underlying expression.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Lists PIDs whose command line matches `pattern`, sorted ascending.
///
/// The calling process, its ancestors, threads, and zombies are never returned.
pub fn find_by_pattern(pattern: &ProcessPattern) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::everything(),
    );

    let excluded = self_and_ancestors(&system);
    let threads: HashSet<sysinfo::Pid> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| process.tasks().map(|tasks| (pid, tasks)))
        .flat_map(|(pid, tasks)| tasks.iter().filter(move |task| *task != pid).copied())
        .collect();

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(pid, _)| !excluded.contains(*pid) && !threads.contains(*pid))
        .filter(|(_, process)| !matches!(process.status(), ProcessStatus::Zombie))
        .filter(|(_, process)| {
            let command_line = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            pattern.matches(&command_line)
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();

    pids.sort_unstable();
    debug!(
        "Process table search for /{}/ matched {:?}",
        pattern.as_str(),
        pids
    );
    pids
}

fn self_and_ancestors(system: &System) -> HashSet<sysinfo::Pid> {
    let mut chain = HashSet::new();
    let mut current = sysinfo::get_current_pid().ok();

    while let Some(pid) = current {
        if !chain.insert(pid) {
            break;
        }
        current = system.process(pid).and_then(|process| process.parent());
    }

    chain
}
