#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path, thread, time::Duration};

use common::{ServiceRoot, is_process_alive, unique_name, wait_for_process_exit};
use svcwarden::{
    config::{LaunchManifest, RequiredEnv},
    error::{EnvViolation, LaunchError},
    launcher::Launcher,
    probe::ProcessPattern,
    runtime::ServiceLayout,
    supervisor::{DiscoverySource, ServiceStatus, StopOutcome, Supervisor},
};

const LONG_RUNNING: &str = "echo ready\nwhile :; do sleep 0.2; done";

fn manifest_launcher(root: &ServiceRoot) -> (Launcher, RequiredEnv) {
    let layout = ServiceLayout::new(root.path());
    let manifest =
        LaunchManifest::load_if_present(&layout.manifest_file()).expect("invalid manifest");
    let required = RequiredEnv::new(manifest.required_env);
    let launcher = Launcher::new(layout)
        .with_runtime(manifest.runtime)
        .with_startup_grace(Duration::from_millis(300));
    (launcher, required)
}

fn supervisor_for(root: &ServiceRoot) -> Supervisor {
    let pattern = ProcessPattern::literal(root.artifact()).expect("invalid pattern");
    Supervisor::new(&ServiceLayout::new(root.path()), pattern)
        .with_poll_interval(Duration::from_millis(100))
        .with_kill_settle(Duration::from_millis(300))
}

#[test]
fn launched_service_can_be_stopped() {
    let root = ServiceRoot::new(&unique_name("launch-roundtrip", "sh"), LONG_RUNNING);
    let (launcher, required) = manifest_launcher(&root);

    let service = launcher
        .start(Path::new(root.artifact()), &required)
        .expect("start failed");
    let pid = service.pid();
    assert_eq!(root.recorded_pid(), Some(pid));

    let supervisor = supervisor_for(&root);
    assert_eq!(
        supervisor.status().unwrap(),
        ServiceStatus::Running {
            pids: vec![pid],
            source: DiscoverySource::Record,
        }
    );

    assert_eq!(supervisor.stop(), StopOutcome::Terminated);
    assert!(!root.pid_file().exists());

    let status = service.wait().expect("wait failed");
    assert!(!status.success());
    wait_for_process_exit(pid);

    let log = fs::read_to_string(root.log_file()).unwrap();
    assert!(log.contains(&format!("svcwarden: started PID {pid}")));
    assert!(log.contains("ready"));
}

#[test]
fn relaunch_appends_to_the_same_log() {
    let root = ServiceRoot::new(&unique_name("launch-append", "sh"), LONG_RUNNING);
    let (launcher, required) = manifest_launcher(&root);
    let supervisor = supervisor_for(&root);

    for _ in 0..2 {
        let service = launcher
            .start(Path::new(root.artifact()), &required)
            .expect("start failed");
        assert_eq!(supervisor.stop(), StopOutcome::Terminated);
        service.wait().expect("wait failed");
    }

    let log = fs::read_to_string(root.log_file()).unwrap();
    assert_eq!(log.matches("svcwarden: started PID").count(), 2);
}

#[test]
fn conditional_requirement_only_applies_when_triggered() {
    let root = ServiceRoot::new(&unique_name("launch-conditional", "sh"), LONG_RUNNING);
    root.write_manifest(
        r#"runtime:
  program: sh
required_env:
  - name: JWT_SECRET
    min_length: 32
    when:
      key: APP_MODE
      equals: production
  - name: DB_URL
"#,
    );
    root.write_env("APP_MODE=Production\nJWT_SECRET=short\n");

    let (launcher, required) = manifest_launcher(&root);
    let err = launcher
        .start(Path::new(root.artifact()), &required)
        .unwrap_err();
    match err {
        LaunchError::Validation(violations) => assert_eq!(
            violations,
            vec![
                EnvViolation::TooShort {
                    name: "JWT_SECRET".into(),
                    min: 32,
                    actual: 5,
                },
                EnvViolation::Missing("DB_URL".into()),
            ]
        ),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!root.pid_file().exists());
    assert!(!root.log_file().exists());

    root.write_env("APP_MODE=staging\nJWT_SECRET=short\nDB_URL=postgres://db/app\n");
    let service = launcher
        .start(Path::new(root.artifact()), &required)
        .expect("start failed");
    assert!(is_process_alive(service.pid()));

    assert_eq!(supervisor_for(&root).stop(), StopOutcome::Terminated);
    service.wait().expect("wait failed");
}

#[test]
fn crash_during_startup_leaves_no_record() {
    let root = ServiceRoot::new(
        &unique_name("launch-crash", "sh"),
        "echo 'fatal: missing config' >&2\nexit 2",
    );
    let (launcher, required) = manifest_launcher(&root);

    let err = launcher
        .start(Path::new(root.artifact()), &required)
        .unwrap_err();
    assert!(matches!(err, LaunchError::ExitedImmediately { .. }), "{err:?}");
    assert!(!root.pid_file().exists());

    thread::sleep(Duration::from_millis(100));
    let log = fs::read_to_string(root.log_file()).unwrap();
    assert!(log.contains("fatal: missing config"));
}
