#[path = "common/mod.rs"]
mod common;

use std::{fs, os::unix::process::ExitStatusExt, time::Duration};

use common::{is_process_alive, kill_quietly, spawn_marked, unique_name};
use svcwarden::{
    probe::ProcessPattern,
    runtime::ServiceLayout,
    supervisor::{DiscoverySource, ServiceStatus, StopOutcome, Supervisor},
};
use tempfile::tempdir;

const SLEEP_LOOP: &str = "while :; do sleep 0.2; done";
const IGNORE_TERM: &str = "trap '' TERM; while :; do sleep 0.2; done";

fn fast_supervisor(root: &std::path::Path, marker: &str) -> Supervisor {
    let pattern = ProcessPattern::literal(marker).expect("invalid pattern");
    Supervisor::new(&ServiceLayout::new(root), pattern)
        .with_poll_interval(Duration::from_millis(100))
        .with_kill_settle(Duration::from_millis(300))
}

#[test]
fn stop_terminates_recorded_process_and_is_idempotent() {
    let temp = tempdir().expect("failed to create tempdir");
    let marker = unique_name("sup-recorded", "jar");
    let mut child = spawn_marked(&marker, SLEEP_LOOP);
    fs::write(temp.path().join("app.pid"), child.id().to_string()).unwrap();

    let supervisor = fast_supervisor(temp.path(), &marker);
    assert_eq!(supervisor.stop(), StopOutcome::Terminated);
    assert!(!temp.path().join("app.pid").exists());

    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGTERM));

    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
}

#[test]
fn stale_record_is_removed_without_signalling() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("app.pid");
    fs::write(&pid_file, "4194305").unwrap();

    let supervisor = fast_supervisor(temp.path(), &unique_name("sup-stale", "jar"));
    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
    assert!(!pid_file.exists());
}

#[test]
fn nothing_to_stop_is_not_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let supervisor = fast_supervisor(temp.path(), &unique_name("sup-absent", "jar"));

    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
    assert!(!temp.path().join("app.pid").exists());
}

#[test]
fn sigterm_resistant_process_is_killed() {
    let temp = tempdir().expect("failed to create tempdir");
    let marker = unique_name("sup-stubborn", "jar");
    let mut child = spawn_marked(&marker, IGNORE_TERM);
    fs::write(temp.path().join("app.pid"), child.id().to_string()).unwrap();

    let supervisor =
        fast_supervisor(temp.path(), &marker).with_graceful_timeout(Duration::from_secs(1));
    assert_eq!(supervisor.stop(), StopOutcome::Terminated);
    assert!(!temp.path().join("app.pid").exists());

    let status = child.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGKILL));
}

#[test]
fn corrupt_record_falls_back_to_process_search() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("app.pid");
    fs::write(&pid_file, "not-a-pid\n").unwrap();

    let marker = unique_name("sup-corrupt", "jar");
    let mut child = spawn_marked(&marker, SLEEP_LOOP);

    let supervisor = fast_supervisor(temp.path(), &marker);
    assert_eq!(supervisor.stop(), StopOutcome::Terminated);
    assert!(!pid_file.exists());

    child.wait().unwrap();
    assert!(common::find_marked(&marker).is_empty());
}

#[test]
fn missing_record_still_finds_every_instance() {
    let temp = tempdir().expect("failed to create tempdir");
    let marker = unique_name("sup-duplicates", "jar");
    let mut first = spawn_marked(&marker, SLEEP_LOOP);
    let mut second = spawn_marked(&marker, SLEEP_LOOP);

    let supervisor = fast_supervisor(temp.path(), &marker);
    assert_eq!(supervisor.stop(), StopOutcome::Terminated);

    first.wait().unwrap();
    second.wait().unwrap();
}

#[test]
fn recorded_stop_also_sweeps_unrecorded_instance() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("app.pid");
    let marker = unique_name("sup-sweep", "jar");
    let mut recorded = spawn_marked(&marker, SLEEP_LOOP);
    let mut stray = spawn_marked(&marker, SLEEP_LOOP);
    fs::write(&pid_file, recorded.id().to_string()).unwrap();

    let supervisor = fast_supervisor(temp.path(), &marker);
    assert_eq!(supervisor.stop(), StopOutcome::Terminated);
    assert!(!pid_file.exists());

    assert_eq!(recorded.wait().unwrap().signal(), Some(libc::SIGTERM));
    assert_eq!(stray.wait().unwrap().signal(), Some(libc::SIGTERM));
    assert!(common::find_marked(&marker).is_empty());
}

#[test]
fn exceeding_the_stop_deadline_fails_and_keeps_record() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("app.pid");
    let marker = unique_name("sup-deadline", "jar");
    let mut child = spawn_marked(&marker, IGNORE_TERM);
    let pid = child.id();
    fs::write(&pid_file, pid.to_string()).unwrap();

    let supervisor = fast_supervisor(temp.path(), &marker)
        .with_graceful_timeout(Duration::from_secs(30))
        .with_stop_deadline(Duration::from_millis(500));

    match supervisor.stop() {
        StopOutcome::Failed { pids, reasons } => {
            assert_eq!(pids, vec![pid]);
            assert_eq!(reasons.len(), 1);
            assert!(
                reasons[0].to_lowercase().contains("deadline"),
                "reason: {}",
                reasons[0]
            );
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(pid_file.exists());
    assert!(is_process_alive(pid));

    kill_quietly(pid);
    child.wait().unwrap();
}

#[test]
fn status_reports_discovery_source() {
    let temp = tempdir().expect("failed to create tempdir");
    let pid_file = temp.path().join("app.pid");
    let marker = unique_name("sup-status", "jar");
    let supervisor = fast_supervisor(temp.path(), &marker);

    assert_eq!(supervisor.status().unwrap(), ServiceStatus::NotRunning);

    let mut child = spawn_marked(&marker, SLEEP_LOOP);
    let pid = child.id();

    fs::write(&pid_file, pid.to_string()).unwrap();
    assert_eq!(
        supervisor.status().unwrap(),
        ServiceStatus::Running {
            pids: vec![pid],
            source: DiscoverySource::Record,
        }
    );

    fs::write(&pid_file, "garbage").unwrap();
    match supervisor.status().unwrap() {
        ServiceStatus::Running { pids, source } => {
            assert_eq!(source, DiscoverySource::ProcessTable);
            assert!(pids.contains(&pid), "{pids:?} should include {pid}");
        }
        other => panic!("expected running, got {other:?}"),
    }
    assert_eq!(fs::read_to_string(&pid_file).unwrap(), "garbage");

    kill_quietly(pid);
    child.wait().unwrap();
    assert_eq!(supervisor.status().unwrap(), ServiceStatus::NotRunning);
}
