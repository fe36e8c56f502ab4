//! Startup: run migrations exactly once per process
//!
//! Health probes can hit the service before migrations finish, and some
//! deployments call the bootstrap from more than one place. The process-wide
//! guard makes every call after the first a no-op error instead of a second,
//! overlapping run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ordinal_db::migrations::{MigrationError, MigrationResult, MigrationRunResult, RunnerState};
use ordinal_db::MigrationRunner;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A set-once flag
#[derive(Debug)]
pub struct InitGuard {
    claimed: AtomicBool,
}

impl InitGuard {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// True for exactly one caller
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

impl Default for InitGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Guards the migration run for the whole process
pub static PROCESS_INIT_GUARD: InitGuard = InitGuard::new();

pub type MigrationTask = JoinHandle<MigrationResult<MigrationRunResult>>;

pub struct Bootstrap {
    runner: Arc<MigrationRunner>,
    guard: &'static InitGuard,
}

impl Bootstrap {
    pub fn new(runner: Arc<MigrationRunner>) -> Self {
        Self::with_guard(runner, &PROCESS_INIT_GUARD)
    }

    pub fn with_guard(runner: Arc<MigrationRunner>, guard: &'static InitGuard) -> Self {
        Self { runner, guard }
    }

    /// Runner state for the health endpoint
    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.runner.subscribe()
    }

    /// Start the migration run in the background
    pub fn spawn(&self) -> MigrationResult<MigrationTask> {
        if !self.guard.try_claim() {
            return Err(MigrationError::AlreadyStarted);
        }

        let runner = self.runner.clone();
        Ok(tokio::spawn(async move {
            info!("Running startup migrations");
            let result = runner.run().await;
            if let Err(err) = &result {
                error!("Startup migrations failed; service stays unhealthy: {}", err);
            }
            result
        }))
    }

    /// Stop the run before its next unapplied migration
    pub fn request_stop(&self) {
        self.runner.request_stop();
    }

    /// Claim the guard and run in the foreground
    pub async fn run(&self) -> MigrationResult<MigrationRunResult> {
        if !self.guard.try_claim() {
            return Err(MigrationError::AlreadyStarted);
        }
        self.runner.run().await
    }
}
