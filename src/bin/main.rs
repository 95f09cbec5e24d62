use std::{
    error::Error,
    path::{Path, PathBuf},
    process::ExitCode,
    thread,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use svcwarden::{
    cli::{Cli, Commands, parse_args},
    config::{LaunchManifest, RequiredEnv},
    constants::{EXIT_FAILURE, EXIT_NOT_RUNNING},
    launcher::Launcher,
    logs,
    probe::ProcessPattern,
    runtime::ServiceLayout,
    signal::{InterruptFlag, SignalBridge},
    supervisor::{DiscoverySource, ServiceStatus, Supervisor},
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    let code = match args.command {
        Commands::Start {
            artifact,
            service_root,
            require,
            manifest,
            foreground,
            startup_grace,
        } => run_start(StartRequest {
            artifact,
            service_root,
            require,
            manifest,
            foreground,
            startup_grace,
        }),
        Commands::Stop {
            artifact_name,
            service_root,
            timeout,
            deadline,
            pattern,
        } => run_stop(&artifact_name, service_root, timeout, deadline, pattern),
        Commands::Status {
            artifact_name,
            service_root,
            pattern,
            json,
        } => run_status(&artifact_name, service_root, pattern, json),
        Commands::Logs {
            service_root,
            lines,
        } => run_logs(service_root, lines),
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

struct StartRequest {
    artifact: PathBuf,
    service_root: PathBuf,
    require: Vec<String>,
    manifest: Option<PathBuf>,
    foreground: bool,
    startup_grace: Option<f64>,
}

fn run_start(request: StartRequest) -> i32 {
    match start(request) {
        Ok(code) => code,
        Err(err) => {
            error!("Start failed: {err}");
            EXIT_FAILURE
        }
    }
}

fn start(request: StartRequest) -> Result<i32, Box<dyn Error>> {
    let layout = ServiceLayout::new(&request.service_root);
    let artifact_name = artifact_name(&request.artifact)?;

    let manifest = match &request.manifest {
        Some(path) => LaunchManifest::load(path)?,
        None => LaunchManifest::load_if_present(&layout.manifest_file())?,
    };
    let required = RequiredEnv::new(manifest.required_env).with_names(&request.require);

    let pattern = ProcessPattern::literal(&artifact_name)?;
    let flag = SignalBridge::new(Supervisor::new(&layout, pattern)).install()?;

    let mut launcher = Launcher::new(layout).with_runtime(manifest.runtime);
    if let Some(secs) = request.startup_grace {
        launcher = launcher.with_startup_grace(Duration::try_from_secs_f64(secs)?);
    }

    let service = match launcher.start(&request.artifact, &required) {
        Ok(service) => service,
        Err(err) => {
            hand_off(&flag);
            return Err(err.into());
        }
    };

    if !request.foreground {
        hand_off(&flag);
        println!("Started {artifact_name} with PID {}", service.pid());
        return Ok(0);
    }
    println!("Started {artifact_name} with PID {}", service.pid());

    info!("Waiting for PID {} to exit", service.pid());
    let waited = service.wait();
    hand_off(&flag);
    let status = waited?;

    if status.success() {
        Ok(0)
    } else {
        warn!("Service exited with {status}");
        Ok(EXIT_FAILURE)
    }
}

/// Returns once later termination requests can no longer start cleanup.
fn hand_off(flag: &InterruptFlag) {
    if !flag.seal() {
        park_until_cleanup();
    }
}

/// Cleanup is running on the handler thread, which exits the process when done.
fn park_until_cleanup() -> ! {
    info!("Termination in progress; waiting for cleanup to finish");
    loop {
        thread::park();
    }
}

fn artifact_name(artifact: &Path) -> Result<String, Box<dyn Error>> {
    artifact
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| format!("artifact path {} has no file name", artifact.display()).into())
}

fn build_supervisor(
    artifact_name: &str,
    service_root: PathBuf,
    pattern: Option<String>,
) -> Result<Supervisor, Box<dyn Error>> {
    let layout = ServiceLayout::new(service_root);
    let pattern = match pattern {
        Some(expression) => ProcessPattern::regex(&expression)?,
        None => ProcessPattern::literal(artifact_name)?,
    };
    Ok(Supervisor::new(&layout, pattern))
}

fn run_stop(
    artifact_name: &str,
    service_root: PathBuf,
    timeout: u64,
    deadline: Option<u64>,
    pattern: Option<String>,
) -> i32 {
    let supervisor = match build_supervisor(artifact_name, service_root, pattern) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!("Stop failed: {err}");
            return EXIT_FAILURE;
        }
    };

    let mut supervisor = supervisor.with_graceful_timeout(Duration::from_secs(timeout));
    if let Some(secs) = deadline {
        supervisor = supervisor.with_stop_deadline(Duration::from_secs(secs));
    }

    let outcome = supervisor.stop();
    if outcome.is_success() {
        println!("{artifact_name}: {outcome}");
    } else {
        error!("{artifact_name}: {outcome}");
    }
    outcome.exit_code()
}

fn run_status(
    artifact_name: &str,
    service_root: PathBuf,
    pattern: Option<String>,
    json: bool,
) -> i32 {
    let status = match build_supervisor(artifact_name, service_root, pattern)
        .and_then(|supervisor| supervisor.status().map_err(Into::into))
    {
        Ok(status) => status,
        Err(err) => {
            error!("Status check failed: {err}");
            return EXIT_FAILURE;
        }
    };

    if json {
        match serde_json::to_string(&status) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                error!("Failed to render status: {err}");
                return EXIT_FAILURE;
            }
        }
    } else {
        match &status {
            ServiceStatus::Running { pids, source } => {
                let source = match source {
                    DiscoverySource::Record => "PID file",
                    DiscoverySource::ProcessTable => "process table",
                };
                println!("{artifact_name}: running (PID {pids:?}, found via {source})");
            }
            ServiceStatus::NotRunning => println!("{artifact_name}: not running"),
        }
    }

    match status {
        ServiceStatus::Running { .. } => 0,
        ServiceStatus::NotRunning => EXIT_NOT_RUNNING,
    }
}

fn run_logs(service_root: PathBuf, lines: usize) -> i32 {
    let path = ServiceLayout::new(service_root).log_file();
    match logs::tail(&path, lines) {
        Ok(tail) => {
            for line in tail {
                println!("{line}");
            }
            0
        }
        Err(err) => {
            error!("Failed to read {}: {err}", path.display());
            EXIT_FAILURE
        }
    }
}
