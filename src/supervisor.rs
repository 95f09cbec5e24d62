//! Stops the managed service: record-based discovery, process-table fallback, and
//! escalating termination (SIGTERM, bounded wait, SIGKILL).
use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::getpgid,
};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    constants::{
        DEFAULT_GRACEFUL_TIMEOUT_SECS, EXIT_FAILURE, FORCE_KILL_SETTLE_DELAY,
        LIVENESS_POLL_INTERVAL, PROGRESS_NOTICE_EVERY,
    },
    error::{StatusError, TerminationError},
    probe::{self, ProcessPattern},
    record::{ProcessRecord, RecordState},
    runtime::ServiceLayout,
};

/// Phase of a single termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum TerminationPhase {
    /// SIGTERM sent, waiting for the process to exit on its own.
    Graceful,
    /// SIGKILL sent after the graceful window elapsed.
    Escalated,
    /// The process is confirmed gone.
    Confirmed,
    /// The process could not be confirmed gone.
    Failed,
}

/// How a PID was confirmed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the graceful window.
    Graceful,
    /// Exited after SIGKILL.
    Forced,
    /// Already gone when a signal was sent.
    Vanished,
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// At least one live process was found and every one was confirmed dead.
    Terminated,
    /// Nothing was running.
    NotRunning,
    /// Some process could not be confirmed dead.
    Failed {
        /// PIDs that were not confirmed dead.
        pids: Vec<u32>,
        /// One message per failure.
        reasons: Vec<String>,
    },
}

impl StopOutcome {
    /// Whether calling automation should treat the stop as successful.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { EXIT_FAILURE }
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "terminated"),
            Self::NotRunning => write!(f, "not running"),
            Self::Failed { pids, reasons } => {
                write!(f, "failed to terminate {pids:?}: {}", reasons.join("; "))
            }
        }
    }
}

/// Where a running process was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// The PID file.
    Record,
    /// Command-line search over the process table.
    ProcessTable,
}

/// Read-only view of whether the service is up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// One or more matching processes are alive.
    Running {
        /// Live PIDs.
        pids: Vec<u32>,
        /// Discovery strategy that found them.
        source: DiscoverySource,
    },
    /// No live process was found.
    NotRunning,
}

/// Ephemeral state for terminating one PID.
#[derive(Debug)]
struct TerminationAttempt {
    pid: u32,
    deadline: Instant,
    cut_short: bool,
    phase: TerminationPhase,
}

impl TerminationAttempt {
    fn new(pid: u32, graceful_timeout: Duration, stop_deadline: Option<Instant>) -> Self {
        let graceful_deadline = Instant::now() + graceful_timeout;
        let (deadline, cut_short) = match stop_deadline {
            Some(limit) if limit < graceful_deadline => (limit, true),
            _ => (graceful_deadline, false),
        };

        Self {
            pid,
            deadline,
            cut_short,
            phase: TerminationPhase::Graceful,
        }
    }

    fn advance(&mut self, phase: TerminationPhase) {
        debug!("PID {}: {} -> {}", self.pid, self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, err: TerminationError) -> TerminationError {
        self.advance(TerminationPhase::Failed);
        err
    }
}

/// Outcomes gathered while a stop request runs.
#[derive(Debug, Default)]
struct StopReport {
    terminated: Vec<(u32, Termination)>,
    failures: Vec<TerminationError>,
}

impl StopReport {
    fn record(&mut self, pid: u32, result: Result<Termination, TerminationError>) {
        match result {
            Ok(termination) => self.terminated.push((pid, termination)),
            Err(err) => {
                error!("{err}");
                self.failures.push(err);
            }
        }
    }

    /// Number of PIDs that only went away after SIGKILL.
    fn forced(&self) -> usize {
        self.terminated
            .iter()
            .filter(|(_, termination)| *termination == Termination::Forced)
            .count()
    }

    fn has_failed(&self, pid: u32) -> bool {
        self.failures.iter().any(|err| err.pid() == pid)
    }

    fn into_outcome(self) -> StopOutcome {
        if !self.failures.is_empty() {
            let mut pids: Vec<u32> = self.failures.iter().map(TerminationError::pid).collect();
            pids.sort_unstable();
            pids.dedup();
            StopOutcome::Failed {
                pids,
                reasons: self.failures.iter().map(ToString::to_string).collect(),
            }
        } else if !self.terminated.is_empty() {
            StopOutcome::Terminated
        } else {
            StopOutcome::NotRunning
        }
    }
}

/// Stops, and reports on, the process managed under one service root.
#[derive(Debug, Clone)]
pub struct Supervisor {
    record: ProcessRecord,
    pattern: ProcessPattern,
    graceful_timeout: Duration,
    poll_interval: Duration,
    kill_settle: Duration,
    stop_budget: Option<Duration>,
}

impl Supervisor {
    /// Creates a supervisor for the service under `layout`, discovered by `pattern`.
    pub fn new(layout: &ServiceLayout, pattern: ProcessPattern) -> Self {
        Self {
            record: ProcessRecord::for_layout(layout),
            pattern,
            graceful_timeout: Duration::from_secs(DEFAULT_GRACEFUL_TIMEOUT_SECS),
            poll_interval: LIVENESS_POLL_INTERVAL,
            kill_settle: FORCE_KILL_SETTLE_DELAY,
            stop_budget: None,
        }
    }

    /// Sets how long SIGTERM gets before SIGKILL.
    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_timeout = timeout;
        self
    }

    /// Sets the interval between liveness polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the delay between SIGKILL and the confirming probe.
    pub fn with_kill_settle(mut self, settle: Duration) -> Self {
        self.kill_settle = settle;
        self
    }

    /// Bounds a whole `stop` call; waits still running when it elapses fail.
    pub fn with_stop_deadline(mut self, budget: Duration) -> Self {
        self.stop_budget = Some(budget);
        self
    }

    /// Stops the service. Safe to call repeatedly.
    pub fn stop(&self) -> StopOutcome {
        let deadline = self.stop_budget.map(|budget| Instant::now() + budget);
        let mut report = StopReport::default();

        let state = match self.record.read() {
            Ok(state) => state,
            Err(err) => {
                warn!("{err}; searching the process table instead");
                RecordState::Absent
            }
        };

        match &state {
            RecordState::Valid(pid) => self.stop_recorded(*pid, deadline, &mut report),
            RecordState::Invalid(content) => {
                warn!(
                    "PID file {} holds invalid content {content:?}; searching the process table",
                    self.record.path().display()
                );
                self.stop_by_pattern(deadline, &mut report);
            }
            RecordState::Absent => {
                info!(
                    "No PID file at {}; searching the process table",
                    self.record.path().display()
                );
                self.stop_by_pattern(deadline, &mut report);
            }
        }

        self.sweep(deadline, &mut report);

        if !report.terminated.is_empty() {
            info!(
                "Confirmed {} process(es) gone, {} after SIGKILL",
                report.terminated.len(),
                report.forced()
            );
        }

        let outcome = report.into_outcome();
        if outcome.is_success() && matches!(state, RecordState::Invalid(_)) {
            self.discard_record();
        }
        outcome
    }

    /// Reports whether the service is running without changing anything.
    pub fn status(&self) -> Result<ServiceStatus, StatusError> {
        if let RecordState::Valid(pid) = self.record.read()? {
            if self.probe(pid, TerminationPhase::Graceful)? {
                return Ok(ServiceStatus::Running {
                    pids: vec![pid],
                    source: DiscoverySource::Record,
                });
            }
            debug!("Recorded PID {pid} is not alive");
        }

        let pids = probe::find_by_pattern(&self.pattern);
        if pids.is_empty() {
            Ok(ServiceStatus::NotRunning)
        } else {
            Ok(ServiceStatus::Running {
                pids,
                source: DiscoverySource::ProcessTable,
            })
        }
    }

    fn stop_recorded(&self, pid: u32, deadline: Option<Instant>, report: &mut StopReport) {
        info!("Found PID file with PID {pid}");

        match self.probe(pid, TerminationPhase::Graceful) {
            Ok(false) => {
                info!("PID {pid} is not running; removing stale PID file");
                self.discard_record();
            }
            Ok(true) => {
                let result = self.terminate(pid, deadline);
                if result.is_ok() {
                    self.discard_record();
                } else {
                    warn!(
                        "Keeping PID file {} for diagnosis",
                        self.record.path().display()
                    );
                }
                report.record(pid, result);
            }
            Err(err) => report.record(pid, Err(err)),
        }
    }

    fn stop_by_pattern(&self, deadline: Option<Instant>, report: &mut StopReport) {
        let pids = probe::find_by_pattern(&self.pattern);
        if pids.is_empty() {
            info!(
                "No running processes match /{}/",
                self.pattern.as_str()
            );
            return;
        }

        info!("Found {} matching process(es): {pids:?}", pids.len());
        for pid in pids {
            let result = self.terminate(pid, deadline);
            report.record(pid, result);
        }
    }

    /// Second pass over the process table catching instances that appeared mid-stop.
    fn sweep(&self, deadline: Option<Instant>, report: &mut StopReport) {
        let survivors: Vec<u32> = probe::find_by_pattern(&self.pattern)
            .into_iter()
            .filter(|pid| !report.has_failed(*pid))
            .collect();

        if survivors.is_empty() {
            return;
        }

        warn!("Found remaining processes after stop: {survivors:?}");
        for pid in survivors {
            let result = self.terminate(pid, deadline);
            report.record(pid, result);
        }
    }

    fn discard_record(&self) {
        match self.record.remove() {
            Ok(true) => debug!("Removed PID file {}", self.record.path().display()),
            Ok(false) => {}
            Err(err) => warn!("{err}"),
        }
    }

    /// Runs the escalating termination protocol against one PID.
    fn terminate(
        &self,
        pid: u32,
        stop_deadline: Option<Instant>,
    ) -> Result<Termination, TerminationError> {
        let mut attempt = TerminationAttempt::new(pid, self.graceful_timeout, stop_deadline);
        if attempt.cut_short && Instant::now() >= attempt.deadline {
            return Err(attempt.fail(TerminationError::DeadlineExceeded { pid }));
        }

        info!("Sending SIGTERM to PID {pid}");
        match self.send(pid, Signal::SIGTERM, attempt.phase) {
            Ok(true) => {}
            Ok(false) => {
                info!("PID {pid} already exited");
                attempt.advance(TerminationPhase::Confirmed);
                return Ok(Termination::Vanished);
            }
            Err(err) => return Err(attempt.fail(err)),
        }

        let started = Instant::now();
        let mut polls: u64 = 0;
        loop {
            match self.probe(pid, attempt.phase) {
                Ok(false) => {
                    info!("PID {pid} terminated gracefully");
                    attempt.advance(TerminationPhase::Confirmed);
                    return Ok(Termination::Graceful);
                }
                Ok(true) => {}
                Err(err) => return Err(attempt.fail(err)),
            }

            let now = Instant::now();
            if now >= attempt.deadline {
                break;
            }

            if polls % PROGRESS_NOTICE_EVERY == 0 {
                info!(
                    "Waiting for PID {pid} to shut down... ({}s/{}s)",
                    started.elapsed().as_secs(),
                    self.graceful_timeout.as_secs()
                );
            }
            thread::sleep(self.poll_interval.min(attempt.deadline - now));
            polls += 1;
        }

        if attempt.cut_short {
            return Err(attempt.fail(TerminationError::DeadlineExceeded { pid }));
        }

        warn!(
            "PID {pid} still running after {}s; sending SIGKILL",
            self.graceful_timeout.as_secs()
        );
        attempt.advance(TerminationPhase::Escalated);
        match self.send(pid, Signal::SIGKILL, attempt.phase) {
            Ok(true) => {}
            Ok(false) => {
                info!("PID {pid} exited before SIGKILL was delivered");
                attempt.advance(TerminationPhase::Confirmed);
                return Ok(Termination::Vanished);
            }
            Err(err) => return Err(attempt.fail(err)),
        }

        thread::sleep(self.kill_settle);
        match self.probe(pid, attempt.phase) {
            Ok(false) => {
                info!("PID {pid} forcefully terminated");
                attempt.advance(TerminationPhase::Confirmed);
                Ok(Termination::Forced)
            }
            Ok(true) => Err(attempt.fail(TerminationError::SurvivedKill { pid })),
            Err(err) => Err(attempt.fail(err)),
        }
    }

    fn probe(&self, pid: u32, phase: TerminationPhase) -> Result<bool, TerminationError> {
        probe::is_alive(pid).map_err(|errno| termination_error(pid, phase, errno))
    }

    /// Sends `signal` to `pid`, and to its process group when it leads one.
    ///
    /// Returns `Ok(false)` when the process no longer exists.
    fn send(
        &self,
        pid: u32,
        signal: Signal,
        phase: TerminationPhase,
    ) -> Result<bool, TerminationError> {
        let Some(target) = probe::signal_target(pid) else {
            return Ok(false);
        };

        if getpgid(Some(target)) == Ok(target) {
            match signal::killpg(target, signal) {
                Ok(()) => debug!("Sent {signal} to process group {pid}"),
                Err(Errno::ESRCH) => {}
                Err(err) => {
                    debug!("Failed to signal process group {pid}: {err}; signalling PID only")
                }
            }
        }

        match signal::kill(target, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(termination_error(pid, phase, errno)),
        }
    }
}

/// EPERM is terminal: a process we may not signal is never reported as gone.
fn termination_error(pid: u32, phase: TerminationPhase, errno: Errno) -> TerminationError {
    match errno {
        Errno::EPERM => TerminationError::PermissionDenied { pid, phase },
        errno => TerminationError::Signal { pid, errno },
    }
}
