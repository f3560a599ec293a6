//! Persisted version record.
//!
//! One `version.json` per installation is the single source of truth for
//! the installed version and the update policy. Writes go through a
//! temp-file-plus-rename so external readers never observe a torn record.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::paths::Paths;

/// Version assumed for a fresh installation.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Default spacing between feed queries (24 hours).
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 86_400;

/// Default backup retention window.
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Persisted instants carry the installation's fixed UTC-3 offset.
pub fn install_tz() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("static UTC-3 offset")
}

/// Current time in the installation's offset.
pub fn now_local() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&install_tz())
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_retention() -> u64 {
    DEFAULT_RETENTION_DAYS
}

/// Durable record of the installed version and update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    pub build_timestamp: DateTime<FixedOffset>,
    pub last_update_timestamp: DateTime<FixedOffset>,
    /// Release feed endpoint; update checks are skipped when absent.
    #[serde(default)]
    pub release_feed_url: Option<String>,
    /// Gate for all automatic checking.
    #[serde(default = "default_true")]
    pub auto_update_enabled: bool,
    /// Minimum spacing between feed queries, in seconds.
    #[serde(default = "default_interval")]
    pub check_interval_secs: u64,
    /// Throttle stamp; advanced only on a successful feed response.
    #[serde(default)]
    pub last_check_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default = "default_retention")]
    pub backup_retention_days: u64,
}

impl Default for VersionRecord {
    fn default() -> Self {
        let now = now_local();
        Self {
            version: DEFAULT_VERSION.to_string(),
            build_timestamp: now,
            last_update_timestamp: now,
            release_feed_url: None,
            auto_update_enabled: true,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            last_check_timestamp: None,
            backup_retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Loads and persists the version record.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            path: paths.version_file(),
        }
    }

    /// Read the record, synthesizing and persisting the default when the
    /// file is absent. A malformed record is logged and replaced by the
    /// default in memory so the caller proceeds degraded instead of
    /// crashing; the corrupt file is left on disk for inspection.
    pub fn load(&self) -> VersionRecord {
        if !self.path.exists() {
            let record = VersionRecord::default();
            self.save(&record);
            return record;
        }

        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(e) => {
                    error!("Malformed version record at {:?}: {}", self.path, e);
                    VersionRecord::default()
                }
            },
            Err(e) => {
                error!("Failed to read version record at {:?}: {}", self.path, e);
                VersionRecord::default()
            }
        }
    }

    /// Serialize to pretty JSON via a sibling temp file and rename. Failure
    /// is reported, not raised; callers decide whether to abort.
    pub fn save(&self, record: &VersionRecord) -> bool {
        let json = match serde_json::to_string_pretty(record) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize version record: {}", e);
                return false;
            }
        };

        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, &json) {
            error!("Failed to write version record {:?}: {}", tmp, e);
            return false;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            error!("Failed to replace version record {:?}: {}", self.path, e);
            let _ = fs::remove_file(&tmp);
            return false;
        }
        true
    }

    /// Advance the record to a freshly installed version and persist.
    pub fn record_installed(&self, record: &mut VersionRecord, version: &str) -> bool {
        let now = now_local();
        record.version = version.to_string();
        record.build_timestamp = now;
        record.last_update_timestamp = now;
        if !self.save(record) {
            warn!("Version record not persisted after install of {}", version);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> VersionStore {
        VersionStore::new(&Paths::new(dir.path()))
    }

    #[test]
    fn test_load_synthesizes_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let record = store.load();
        assert_eq!(record.version, DEFAULT_VERSION);
        assert!(record.auto_update_enabled);
        assert_eq!(record.check_interval_secs, 86_400);
        assert_eq!(record.backup_retention_days, 7);
        // The default must be persisted before returning.
        assert!(dir.path().join("version.json").exists());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut record = store.load();
        record.version = "2.3.4".to_string();
        record.release_feed_url = Some("https://example.invalid/feed".to_string());
        assert!(store.save(&record));

        let reloaded = store.load();
        assert_eq!(reloaded.version, "2.3.4");
        assert_eq!(
            reloaded.release_feed_url.as_deref(),
            Some("https://example.invalid/feed")
        );
    }

    #[test]
    fn test_malformed_record_degrades_to_default() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(dir.path().join("version.json"), "{not json").unwrap();

        let record = store.load();
        assert_eq!(record.version, DEFAULT_VERSION);
        // Corrupt file stays on disk for inspection.
        let raw = std::fs::read_to_string(dir.path().join("version.json")).unwrap();
        assert_eq!(raw, "{not json");
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&VersionRecord::default());
        assert!(!dir.path().join("version.json.tmp").exists());
    }

    #[test]
    fn test_timestamps_carry_fixed_offset() {
        let now = now_local();
        assert_eq!(now.offset().local_minus_utc(), -3 * 3600);
    }
}
