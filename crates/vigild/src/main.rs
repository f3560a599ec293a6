//! Vigil Daemon - Self-updating host monitoring agent.
//!
//! Composition root: builds the path map, version store, service control,
//! update orchestrator, and telemetry storage, then runs two worker threads
//! (telemetry loop, update scheduler) until a shutdown signal arrives.

mod scheduler;
mod storage;
mod telemetry;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_common::{Paths, ServiceControl, SystemdControl, VersionStore, SERVICE_UNIT};

use scheduler::UpdateScheduler;
use storage::Storage;
use telemetry::Collector;

/// Default spacing between telemetry collections.
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    let paths = Paths::resolve();
    let env_entries = load_env_file(&paths.env_file());
    init_logging(&paths)?;

    info!("🛰  Vigil daemon v{} starting", env!("CARGO_PKG_VERSION"));
    if env_entries > 0 {
        debug!("Loaded {} entries from {:?}", env_entries, paths.env_file());
    }

    let store = VersionStore::new(&paths);
    let mut record = store.load();
    if record.release_feed_url.is_none() {
        if let Ok(url) = std::env::var("VIGIL_FEED_URL") {
            record.release_feed_url = Some(url);
            store.save(&record);
        }
    }
    info!(
        "Installed version {} (auto-update: {})",
        record.version,
        if record.auto_update_enabled { "on" } else { "off" }
    );

    let service: Arc<dyn ServiceControl> = Arc::new(SystemdControl::new(SERVICE_UNIT));
    let updater = UpdateScheduler::spawn(paths.clone(), Arc::clone(&service))?;

    let storage = Storage::open(&paths)?;
    let stop = Arc::new(AtomicBool::new(false));
    let monitor_stop = Arc::clone(&stop);
    let monitor_interval = std::env::var("VIGIL_MONITOR_INTERVAL")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS);
    let monitor = thread::Builder::new()
        .name("vigil-monitor".to_string())
        .spawn(move || run_monitor_loop(storage, monitor_interval, &monitor_stop))
        .context("Failed to spawn monitor thread")?;

    info!("Vigil daemon ready");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down gracefully");
    stop.store(true, Ordering::SeqCst);
    if monitor.join().is_err() {
        warn!("Monitor thread panicked during shutdown");
    }
    updater.stop();
    Ok(())
}

/// Collect and persist one telemetry snapshot per interval.
fn run_monitor_loop(storage: Storage, interval_secs: u64, stop: &AtomicBool) {
    let collector = Collector::new();
    while !stop.load(Ordering::SeqCst) {
        let snapshot = collector.collect();
        match storage.insert_snapshot(&snapshot) {
            Ok(()) => debug!("Stored telemetry snapshot for {}", snapshot.hostname),
            Err(e) => warn!("Failed to store telemetry snapshot: {:#}", e),
        }
        scheduler::sleep_in_slices(Duration::from_secs(interval_secs), stop);
    }
}

/// Log to stdout and to the daemon log file the validator tails.
fn init_logging(paths: &Paths) -> Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.daemon_log())
        .with_context(|| format!("Failed to open log file {:?}", paths.daemon_log()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

/// Apply `KEY=VALUE` lines from the installation's `.env`. Absent file is
/// fine; malformed lines are skipped.
fn load_env_file(path: &Path) -> usize {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return 0,
    };
    let mut applied = 0;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            std::env::set_var(key.trim(), value.trim().trim_matches('"'));
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_env_file_applies_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nVIGIL_TEST_KEY=hello\n\nVIGIL_TEST_QUOTED=\"world\"\nnot-a-pair\n",
        )
        .unwrap();

        // `not-a-pair` has no '=', so only two entries apply.
        assert_eq!(load_env_file(&path), 2);
        assert_eq!(std::env::var("VIGIL_TEST_KEY").unwrap(), "hello");
        assert_eq!(std::env::var("VIGIL_TEST_QUOTED").unwrap(), "world");
    }

    #[test]
    fn test_load_env_file_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_env_file(&dir.path().join(".env")), 0);
    }
}
