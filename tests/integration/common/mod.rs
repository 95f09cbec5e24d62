#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Child, Command},
    thread,
    time::{Duration, Instant},
};

use svcwarden::probe::{ProcessPattern, find_by_pattern};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tempfile::TempDir;

/// A throwaway service root with a `.env`, an artifact script, and a `launch.yaml`
/// that runs the artifact through `sh`.
pub struct ServiceRoot {
    temp: TempDir,
    artifact: String,
}

impl ServiceRoot {
    pub fn new(artifact: &str, script: &str) -> Self {
        let temp = tempfile::tempdir().expect("failed to create tempdir");
        let root = temp.path();

        fs::write(root.join(".env"), "APP_MODE=test\nJWT_SECRET=abcdefghijklmnop\n")
            .expect("failed to write .env");
        write_script(&root.join(artifact), script);
        fs::write(
            root.join("launch.yaml"),
            "runtime:\n  program: sh\n  args: []\n",
        )
        .expect("failed to write launch.yaml");

        Self {
            temp,
            artifact: artifact.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.path().join(&self.artifact)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.path().join("app.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path().join("app.log")
    }

    pub fn write_env(&self, content: &str) {
        fs::write(self.path().join(".env"), content).expect("failed to write .env");
    }

    pub fn write_manifest(&self, content: &str) {
        fs::write(self.path().join("launch.yaml"), content).expect("failed to write manifest");
    }

    pub fn recorded_pid(&self) -> Option<u32> {
        fs::read_to_string(self.pid_file())
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }
}

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
}

/// Spawns `sh -c <script>` with `marker` as `$0` so it shows up in the command line.
pub fn spawn_marked(marker: &str, script: &str) -> Child {
    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .arg(marker)
        .spawn()
        .expect("failed to spawn marked process");
    wait_for_match(marker, child.id());
    child
}

/// Waits until `pid` is visible with `marker` in its command line.
pub fn wait_for_match(marker: &str, pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if find_marked(marker).contains(&pid) {
            return;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for PID {pid} to match '{marker}'");
        }

        thread::sleep(Duration::from_millis(50));
    }
}

pub fn find_marked(marker: &str) -> Vec<u32> {
    find_by_pattern(&ProcessPattern::literal(marker).expect("invalid marker"))
}

pub fn unique_name(label: &str, extension: &str) -> String {
    format!("{label}-{}.{extension}", std::process::id())
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

pub fn wait_for_pid_file(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(content) = fs::read_to_string(path)
            && let Ok(pid) = content.trim().parse::<u32>()
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for a PID in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

/// Live and not a zombie.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .process(Pid::from_u32(pid))
        .is_some_and(|process| !matches!(process.status(), ProcessStatus::Zombie))
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {} to exit", pid);
}

/// Best-effort SIGKILL for processes a test left behind.
pub fn kill_quietly(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}
