//! Launches the service artifact as a detached process and records its PID.
use std::{
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    config::{EnvFile, LaunchCommand, RequiredEnv, RuntimeSpec, display_value},
    constants::STARTUP_SETTLE_DELAY,
    error::LaunchError,
    logs::{append_marker, open_log_sink},
    record::ProcessRecord,
    runtime::ServiceLayout,
};

/// Starts the artifact under one service root.
#[derive(Debug, Clone)]
pub struct Launcher {
    layout: ServiceLayout,
    runtime: Option<RuntimeSpec>,
    startup_grace: Duration,
}

impl Launcher {
    /// Creates a launcher for `layout` using the default runtime selection.
    pub fn new(layout: ServiceLayout) -> Self {
        Self {
            layout,
            runtime: None,
            startup_grace: STARTUP_SETTLE_DELAY,
        }
    }

    /// Overrides how the artifact is executed.
    pub fn with_runtime(mut self, runtime: Option<RuntimeSpec>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Sets how long the process must survive before the launch counts as successful.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Validates the environment, spawns the artifact detached, and records its PID.
    ///
    /// Nothing is spawned and no record is written when a precondition or validation
    /// check fails. A process that exits within the startup grace period is an error.
    pub fn start(
        &self,
        artifact: &Path,
        required: &RequiredEnv,
    ) -> Result<LaunchedService, LaunchError> {
        let artifact = self.layout.resolve_artifact(artifact);
        let env_path = self.layout.env_file();

        if !env_path.exists() {
            return Err(LaunchError::EnvFileMissing(env_path));
        }
        if !artifact.exists() {
            return Err(LaunchError::ArtifactMissing(artifact));
        }
        info!("Found artifact: {}", artifact.display());

        let env = EnvFile::load(&env_path)?;
        if env.is_empty() {
            warn!("Environment file {} defines no variables", env_path.display());
        } else {
            info!(
                "Loaded {} environment variables from {}",
                env.len(),
                env_path.display()
            );
        }

        if let Err(violations) = required.validate(&env) {
            for violation in &violations {
                error!("{violation}");
            }
            return Err(LaunchError::Validation(violations));
        }
        for requirement in required.requirements() {
            if let Some(value) = env.get(&requirement.name) {
                debug!("{} = {}", requirement.name, display_value(&requirement.name, value));
            }
        }

        let command = LaunchCommand::build(&artifact, self.runtime.as_ref());
        let mut child = self.spawn(&command, &env)?;
        let pid = child.id();
        info!("Started `{}` with PID {pid}", command.display());

        let log_path = self.layout.log_file();
        if let Err(err) = append_marker(&log_path, &format!("started PID {pid}")) {
            warn!("Failed to write launch marker to {}: {err}", log_path.display());
        }

        let record = ProcessRecord::for_layout(&self.layout);
        if let Err(err) = record.write(pid) {
            error!("Failed to record PID {pid}; terminating the new process");
            abandon(&mut child, &record);
            return Err(err.into());
        }
        info!("PID saved to {}", record.path().display());

        thread::sleep(self.startup_grace);

        let exited = match child.try_wait() {
            Ok(exited) => exited,
            Err(err) => {
                error!("Failed to check PID {pid} after startup; terminating it");
                abandon(&mut child, &record);
                return Err(err.into());
            }
        };
        if let Some(status) = exited {
            if let Err(err) = record.remove() {
                warn!("{err}");
            }
            return Err(LaunchError::ExitedImmediately {
                pid,
                status: status.to_string(),
                log: log_path,
            });
        }

        info!("Service process {pid} is running");
        Ok(LaunchedService { pid, child, record })
    }

    fn spawn(&self, command: &LaunchCommand, env: &EnvFile) -> Result<Child, LaunchError> {
        let sink = open_log_sink(&self.layout.log_file())?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(self.layout.root())
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(sink.stdout)
            .stderr(sink.stderr);

        debug!("Executing command: {cmd:?}");

        unsafe {
            cmd.pre_exec(|| {
                // New session: the service outlives us and ignores signals sent to our group.
                if libc::setsid() < 0 {
                    let err = std::io::Error::last_os_error();
                    eprintln!("svcwarden pre_exec: setsid failed: {err:?}");
                    return Err(err);
                }
                Ok(())
            });
        }

        cmd.spawn().map_err(|source| LaunchError::Spawn {
            command: command.program.display().to_string(),
            source,
        })
    }
}

/// Kills and reaps a child whose launch cannot be completed, then clears its record.
fn abandon(child: &mut Child, record: &ProcessRecord) {
    let pid = child.id();
    if let Err(err) = child.kill() {
        warn!("Failed to kill PID {pid}: {err}");
    }
    if let Err(err) = child.wait() {
        warn!("Failed to reap PID {pid}: {err}");
    }
    if let Err(err) = record.remove() {
        warn!("{err}");
    }
}

/// A process that survived the startup grace period.
#[derive(Debug)]
pub struct LaunchedService {
    pid: u32,
    child: Child,
    record: ProcessRecord,
}

impl LaunchedService {
    /// PID of the running service.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Blocks until the service exits, then clears its PID record.
    pub fn wait(mut self) -> Result<ExitStatus, LaunchError> {
        let status = self.child.wait()?;
        info!("Service process {} exited: {status}", self.pid);

        if self.record.read()?.pid() == Some(self.pid) {
            self.record.remove()?;
        }
        Ok(status)
    }
}
