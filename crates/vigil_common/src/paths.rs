//! Installation path map.
//!
//! Every component receives a `Paths` built once at the composition root,
//! so tests can point the whole engine at a scratch directory.

use std::path::{Path, PathBuf};

/// systemd unit controlling the daemon process.
pub const SERVICE_UNIT: &str = "vigild";

/// Well-known files captured in a backup archive. Missing files are
/// skipped, not an error.
pub const BACKUP_FILES: &[&str] = &["vigild", "vigilctl", "version.json", ".env", "schema.sql"];

/// Well-known files copied from a release artifact over the live
/// installation.
pub const UPDATE_FILES: &[&str] = &["vigild", "vigilctl", "schema.sql"];

/// Main executable searched for when locating the payload root inside an
/// extracted artifact.
pub const MAIN_EXECUTABLE: &str = "vigild";

/// Resolved locations of everything the agent reads or mutates inside its
/// installation root.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Installation root from `VIGIL_HOME`, falling back to the directory
    /// holding the current executable, then the working directory.
    pub fn resolve() -> Self {
        if let Ok(home) = std::env::var("VIGIL_HOME") {
            return Self::new(home);
        }
        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted version record.
    pub fn version_file(&self) -> PathBuf {
        self.root.join("version.json")
    }

    /// Backup archives.
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Scratch area for downloads and extraction, removed at the end of
    /// every update attempt.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("update_staging")
    }

    /// Extraction area inside staging.
    pub fn extract_dir(&self) -> PathBuf {
        self.staging_dir().join("extracted")
    }

    /// The daemon's own log file, tailed by post-install validation.
    pub fn daemon_log(&self) -> PathBuf {
        self.root.join("vigild.log")
    }

    /// Telemetry database.
    pub fn database(&self) -> PathBuf {
        self.root.join("vigil.db")
    }

    /// Optional environment overrides.
    pub fn env_file(&self) -> PathBuf {
        self.root.join(".env")
    }

    /// Optional schema definition applied by the telemetry store.
    pub fn schema_file(&self) -> PathBuf {
        self.root.join("schema.sql")
    }
}
