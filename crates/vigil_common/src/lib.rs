//! Vigil Common - Self-update engine shared by the daemon and CLI.
//!
//! Safety contract: backup before mutation, verify before install,
//! validate before declaring success, rollback on validation failure.

pub mod backup;
pub mod download;
pub mod error;
pub mod install;
pub mod orchestrator;
pub mod paths;
pub mod release;
pub mod service;
pub mod validate;
pub mod version_store;

pub use backup::BackupManager;
pub use download::{sha256_of, Downloader};
pub use error::UpdateError;
pub use install::Installer;
pub use orchestrator::{CycleOutcome, UpdateOrchestrator, UpdatePhase};
pub use paths::{Paths, BACKUP_FILES, MAIN_EXECUTABLE, SERVICE_UNIT, UPDATE_FILES};
pub use release::{is_newer_version, ReleaseCandidate, ReleaseChecker, ReleaseFeedEntry};
pub use service::{ServiceControl, SystemdControl};
pub use validate::Validator;
pub use version_store::{install_tz, now_local, VersionRecord, VersionStore, DEFAULT_VERSION};
