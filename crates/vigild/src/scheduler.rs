//! Recurring update checks.
//!
//! The scheduler owns a dedicated OS thread so the update engine's blocking
//! network calls never touch the daemon's workload. Exactly one orchestrator
//! cycle runs at a time; the next wait starts only after the previous cycle
//! returns. Sleeps happen in short slices so a stop request is honored
//! promptly rather than at the end of a 24-hour nap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};
use vigil_common::{CycleOutcome, Paths, ServiceControl, UpdateOrchestrator};

/// Longest single sleep between stop-flag checks.
const SLEEP_SLICE_SECS: u64 = 60;

/// Back-off after a cycle that ended in an internal failure.
const ERROR_COOLDOWN_SECS: u64 = 300;

pub struct UpdateScheduler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateScheduler {
    /// Spawn the scheduler thread. The orchestrator (and its blocking HTTP
    /// clients) is constructed inside the thread, away from the tokio
    /// runtime; the version store is re-read each pass so interval changes
    /// take effect without a restart.
    pub fn spawn(paths: Paths, service: Arc<dyn ServiceControl>) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("vigil-updater".to_string())
            .spawn(move || {
                let orchestrator = match UpdateOrchestrator::new(paths, service) {
                    Ok(orchestrator) => orchestrator,
                    Err(e) => {
                        error!("Update scheduler disabled: {:#}", e);
                        return;
                    }
                };
                run_loop(orchestrator, &flag)
            })?;
        info!("Update scheduler started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit. A cycle already in
    /// flight finishes first, bounded by its operation timeouts.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Update scheduler thread panicked");
            }
        }
        info!("Update scheduler stopped");
    }
}

fn run_loop(orchestrator: UpdateOrchestrator, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        let outcome = orchestrator.run_cycle();

        let wait_secs = match outcome {
            CycleOutcome::Failed { .. } | CycleOutcome::RollbackFailed { .. } => {
                warn!("Cooling down {}s after failed cycle", ERROR_COOLDOWN_SECS);
                ERROR_COOLDOWN_SECS
            }
            _ => orchestrator.store().load().check_interval_secs,
        };

        sleep_in_slices(Duration::from_secs(wait_secs), stop);
    }
}

/// Sleep `total`, at most [`SLEEP_SLICE_SECS`] at a time, returning early
/// once the stop flag is raised.
pub(crate) fn sleep_in_slices(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let slice = remaining.min(Duration::from_secs(SLEEP_SLICE_SECS));
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_returns_early_on_stop() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_in_slices(Duration::from_secs(3600), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_runs_to_completion_without_stop() {
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        sleep_in_slices(Duration::from_millis(50), &stop);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
