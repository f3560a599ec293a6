//! Post-install validation.
//!
//! Starts the freshly installed daemon, waits a settle period, probes its
//! running state, and scans the tail of its log for critical markers that
//! appeared inside the observation window. Everything here fails closed:
//! an error during validation means the update is judged bad and rolled
//! back.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{error, info, warn};

use crate::paths::Paths;
use crate::service::ServiceControl;
use crate::version_store::install_tz;

/// Wait after process start before judging health.
const SETTLE_PERIOD_SECS: u64 = 10;

/// Log lines inspected from the end of the file.
const TAIL_LINES: usize = 50;

/// Severity markers that fail validation when found inside the window.
const CRITICAL_MARKERS: &[&str] = &[
    "CRITICAL",
    "FATAL",
    "ERROR",
    "Exception",
    "panicked",
    "Failed to start",
    "Connection failed",
];

pub struct Validator {
    paths: Paths,
    service: Arc<dyn ServiceControl>,
    settle: Duration,
}

impl Validator {
    pub fn new(paths: Paths, service: Arc<dyn ServiceControl>) -> Self {
        Self {
            paths,
            service,
            settle: Duration::from_secs(SETTLE_PERIOD_SECS),
        }
    }

    /// Override the settle period (tests use zero).
    pub fn with_settle_period(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Start the process and confirm it is alive and free of fresh
    /// critical log entries.
    pub fn validate(&self) -> bool {
        let window_start = Utc::now();

        if !self.service.start() {
            error!("Validation failed: service did not start");
            return false;
        }

        std::thread::sleep(self.settle);

        if !self.service.is_running() {
            error!("Validation failed: service is not running after settle period");
            return false;
        }

        if self.has_critical_errors(window_start) {
            error!("Validation failed: critical log entries in observation window");
            return false;
        }

        info!("Validation passed");
        true
    }

    /// Scan the log tail for critical markers. Only lines stamped inside
    /// the observation window count; a critical line whose timestamp
    /// cannot be parsed counts too (fail closed). A missing log file is
    /// clean; any other read error is treated as critical.
    fn has_critical_errors(&self, window_start: DateTime<Utc>) -> bool {
        let log_path = self.paths.daemon_log();
        if !log_path.exists() {
            return false;
        }

        let lines = match read_log_tail(&log_path, TAIL_LINES) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Could not read daemon log {:?}: {}", log_path, e);
                return true;
            }
        };

        for line in &lines {
            if !CRITICAL_MARKERS.iter().any(|m| line.contains(m)) {
                continue;
            }
            match parse_line_timestamp(line) {
                Some(stamp) if stamp < window_start => continue,
                _ => {
                    warn!("Critical log entry: {}", line.trim());
                    return true;
                }
            }
        }
        false
    }
}

/// Last `n` lines of a log file, tolerating non-UTF-8 bytes via lossy
/// decoding.
fn read_log_tail(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines.into_iter().skip(skip).collect())
}

/// Parse the leading timestamp of a log line. Accepts RFC 3339 (the
/// tracing default) and `YYYY-MM-DD HH:MM:SS` (interpreted in the
/// installation's offset).
fn parse_line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;

    if let Ok(stamp) = DateTime::parse_from_rfc3339(first) {
        return Some(stamp.with_timezone(&Utc));
    }

    let second = tokens.next()?;
    let joined = format!("{} {}", first, second);
    let naive = NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    install_tz()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct FakeService {
        start_ok: bool,
        running: AtomicBool,
    }

    impl FakeService {
        fn new(start_ok: bool, running: bool) -> Self {
            Self {
                start_ok,
                running: AtomicBool::new(running),
            }
        }
    }

    impl ServiceControl for FakeService {
        fn stop(&self) -> bool {
            true
        }
        fn start(&self) -> bool {
            self.start_ok
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn validator(dir: &TempDir, service: FakeService) -> Validator {
        Validator::new(Paths::new(dir.path()), Arc::new(service))
            .with_settle_period(Duration::ZERO)
    }

    #[test]
    fn test_start_failure_fails_validation() {
        let dir = TempDir::new().unwrap();
        assert!(!validator(&dir, FakeService::new(false, false)).validate());
    }

    #[test]
    fn test_not_running_fails_validation() {
        let dir = TempDir::new().unwrap();
        assert!(!validator(&dir, FakeService::new(true, false)).validate());
    }

    #[test]
    fn test_missing_log_passes() {
        let dir = TempDir::new().unwrap();
        assert!(validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_fresh_critical_entry_fails() {
        let dir = TempDir::new().unwrap();
        let stamp = Utc::now().to_rfc3339();
        fs::write(
            dir.path().join("vigild.log"),
            format!("{stamp}  INFO vigild: starting\n{stamp} CRITICAL vigild: Connection failed\n"),
        )
        .unwrap();
        assert!(!validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_stale_critical_entry_is_ignored() {
        let dir = TempDir::new().unwrap();
        // Stamped well before the observation window opens.
        fs::write(
            dir.path().join("vigild.log"),
            "2020-01-01T00:00:00Z ERROR vigild: Connection failed\n",
        )
        .unwrap();
        assert!(validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_unstamped_critical_entry_fails_closed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("vigild.log"), "FATAL: something broke\n").unwrap();
        assert!(!validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_tail_window_skips_old_lines() {
        let dir = TempDir::new().unwrap();
        // A critical line buried beyond the 50-line tail is never seen.
        let mut content = String::from("FATAL: ancient failure\n");
        for i in 0..60 {
            content.push_str(&format!("2020-01-01T00:00:00Z  INFO vigild: tick {}\n", i));
        }
        fs::write(dir.path().join("vigild.log"), content).unwrap();
        assert!(validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_lossy_decoding_tolerates_bad_bytes() {
        let dir = TempDir::new().unwrap();
        let mut bytes = b"2020-01-01T00:00:00Z  INFO vigild: ol".to_vec();
        bytes.push(0xE9); // lone latin-1 byte
        bytes.extend_from_slice(b"!\n");
        fs::write(dir.path().join("vigild.log"), bytes).unwrap();
        assert!(validator(&dir, FakeService::new(true, true)).validate());
    }

    #[test]
    fn test_plain_timestamp_format_parses() {
        let parsed = parse_line_timestamp("2024-01-15 10:30:00 ERROR boom");
        assert!(parsed.is_some());
    }
}
