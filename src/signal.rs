//! Routes external termination requests (SIGINT, SIGTERM, SIGHUP) to the supervisor.
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tracing::{debug, error, info, warn};

use crate::{constants::EXIT_FAILURE, supervisor::Supervisor};

const IDLE: u8 = 0;
const CLEANING: u8 = 1;
const SEALED: u8 = 2;

/// Shared between the signal handler and the thread that installed the bridge.
///
/// Moves from idle to either cleaning (a request arrived) or sealed (the launcher
/// finished and later requests must not start cleanup). Neither state is left.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicU8>);

impl InterruptFlag {
    /// Whether a termination request has started cleanup.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CLEANING
    }

    /// Stops later requests from starting cleanup.
    ///
    /// Returns `false` when cleanup had already started; the caller must then let the
    /// handler finish and exit the process.
    pub fn seal(&self) -> bool {
        match self
            .0
            .compare_exchange(IDLE, SEALED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(state) => state == SEALED,
        }
    }

    fn claim(&self) -> Result<(), u8> {
        self.0
            .compare_exchange(IDLE, CLEANING, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }
}

/// Stops the managed service when the launcher itself is asked to terminate.
#[derive(Debug)]
pub struct SignalBridge {
    supervisor: Supervisor,
    flag: InterruptFlag,
}

impl SignalBridge {
    /// Creates a bridge that cleans up with `supervisor`.
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            flag: InterruptFlag::default(),
        }
    }

    /// Flag observers can poll to learn that cleanup has started.
    pub fn flag(&self) -> InterruptFlag {
        self.flag.clone()
    }

    /// Runs the stop protocol for the first request only.
    ///
    /// Returns the exit code to terminate with, or `None` when a previous request is
    /// already being handled or the flag was sealed.
    pub fn handle(&self) -> Option<i32> {
        match self.flag.claim() {
            Ok(()) => {}
            Err(SEALED) => {
                debug!("Launch already handed off; ignoring termination request");
                return None;
            }
            Err(_) => {
                warn!("Cleanup already in progress; ignoring repeated termination request");
                return None;
            }
        }

        warn!("Termination requested; stopping the service before exiting");
        let outcome = self.supervisor.stop();
        if outcome.is_success() {
            info!("Cleanup finished: service {outcome}");
        } else {
            error!("Cleanup incomplete: {outcome}");
        }

        Some(EXIT_FAILURE)
    }

    /// Installs the process-wide handler. The process exits once cleanup completes.
    pub fn install(self) -> Result<InterruptFlag, ctrlc::Error> {
        let flag = self.flag();
        ctrlc::set_handler(move || {
            if let Some(code) = self.handle() {
                std::process::exit(code);
            }
        })?;
        Ok(flag)
    }
}
