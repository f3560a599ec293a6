//! Update cycle state machine.
//!
//! Sequences check → backup → download → install → validate, rolling back
//! through the pre-update backup when validation fails. Every irreversible
//! step is preceded by a reversible checkpoint: no backup means no update,
//! no verified artifact means no install, no passed validation means no
//! success. The staging directory is removed at the end of every cycle on
//! all return paths.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::backup::BackupManager;
use crate::download::Downloader;
use crate::install::Installer;
use crate::paths::Paths;
use crate::release::ReleaseChecker;
use crate::service::ServiceControl;
use crate::validate::Validator;
use crate::version_store::VersionStore;

/// Phases of one update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Checking,
    BackingUp,
    Downloading,
    Installing,
    Validating,
    Succeeded,
    RollingBack,
    Failed,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Checking => "checking",
            UpdatePhase::BackingUp => "backing-up",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Installing => "installing",
            UpdatePhase::Validating => "validating",
            UpdatePhase::Succeeded => "succeeded",
            UpdatePhase::RollingBack => "rolling-back",
            UpdatePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one update cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No candidate this cycle (gate, throttle, or already current).
    NoUpdate,
    /// Update installed and validated.
    Updated { version: String },
    /// Cycle failed before or during install; `phase` names where.
    Failed { phase: UpdatePhase, reason: String },
    /// Validation failed and the previous state was restored.
    RolledBack { reason: String },
    /// Validation failed and restore/restart also failed. Manual
    /// intervention required.
    RollbackFailed { reason: String },
}

pub struct UpdateOrchestrator {
    paths: Paths,
    store: VersionStore,
    checker: ReleaseChecker,
    backups: BackupManager,
    downloader: Downloader,
    installer: Installer,
    validator: Validator,
    service: Arc<dyn ServiceControl>,
}

impl UpdateOrchestrator {
    pub fn new(paths: Paths, service: Arc<dyn ServiceControl>) -> Result<Self> {
        let store = VersionStore::new(&paths);
        Ok(Self {
            checker: ReleaseChecker::new(store.clone())?,
            backups: BackupManager::new(paths.clone()),
            downloader: Downloader::new(paths.clone())?,
            installer: Installer::new(paths.clone(), store.clone(), Arc::clone(&service)),
            validator: Validator::new(paths.clone(), Arc::clone(&service)),
            store,
            paths,
            service,
        })
    }

    /// Shorten the validator's settle period (tests use zero).
    pub fn with_settle_period(mut self, settle: Duration) -> Self {
        self.validator = self.validator.with_settle_period(settle);
        self
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Run one full update cycle. The staging directory is cleaned up
    /// whatever the outcome.
    pub fn run_cycle(&self) -> CycleOutcome {
        let outcome = self.run_cycle_inner();
        self.cleanup_staging();
        match &outcome {
            CycleOutcome::NoUpdate => debug!("Update cycle: no update"),
            CycleOutcome::Updated { version } => info!("Update cycle: updated to {}", version),
            CycleOutcome::Failed { phase, reason } => {
                error!("Update cycle failed while {}: {}", phase, reason)
            }
            CycleOutcome::RolledBack { reason } => {
                warn!("Update cycle rolled back: {}", reason)
            }
            CycleOutcome::RollbackFailed { reason } => {
                error!(
                    "Update cycle rollback FAILED, manual intervention required: {}",
                    reason
                )
            }
        }
        outcome
    }

    fn run_cycle_inner(&self) -> CycleOutcome {
        self.enter(UpdatePhase::Checking);
        let mut record = self.store.load();
        let candidate = match self.checker.check_for_update(&mut record) {
            Some(candidate) => candidate,
            None => return CycleOutcome::NoUpdate,
        };

        self.enter(UpdatePhase::BackingUp);
        let backup = match self.backups.create_backup(&record) {
            Ok(path) => path,
            Err(e) => {
                // Nothing was mutated; safe to stop here.
                return CycleOutcome::Failed {
                    phase: UpdatePhase::BackingUp,
                    reason: e.to_string(),
                };
            }
        };

        self.enter(UpdatePhase::Downloading);
        let artifact = match self.downloader.download(&candidate) {
            Ok(path) => path,
            Err(e) => {
                // Live installation untouched; safe to stop here.
                return CycleOutcome::Failed {
                    phase: UpdatePhase::Downloading,
                    reason: e.to_string(),
                };
            }
        };

        self.enter(UpdatePhase::Installing);
        if let Err(e) = self.installer.install(&artifact, &candidate) {
            // Files may be partially copied at this point.
            return CycleOutcome::Failed {
                phase: UpdatePhase::Installing,
                reason: format!("{}; manual intervention may be required", e),
            };
        }

        self.enter(UpdatePhase::Validating);
        if self.validator.validate() {
            self.enter(UpdatePhase::Succeeded);
            return CycleOutcome::Updated {
                version: candidate.version,
            };
        }

        self.enter(UpdatePhase::RollingBack);
        warn!(
            "Validation of {} failed, restoring {:?}",
            candidate.version, backup
        );
        let restored = self.backups.restore(&backup);
        let restarted = restored && self.service.start();
        if restored && restarted {
            CycleOutcome::RolledBack {
                reason: format!("validation of {} failed", candidate.version),
            }
        } else {
            self.enter(UpdatePhase::Failed);
            CycleOutcome::RollbackFailed {
                reason: if restored {
                    format!("service restart failed after restoring {:?}", backup)
                } else {
                    format!("restore of {:?} failed", backup)
                },
            }
        }
    }

    fn enter(&self, phase: UpdatePhase) {
        debug!("Update phase: {}", phase);
    }

    fn cleanup_staging(&self) {
        let staging = self.paths.staging_dir();
        if staging.exists() {
            match std::fs::remove_dir_all(&staging) {
                Ok(()) => debug!("Removed staging directory {:?}", staging),
                Err(e) => warn!("Failed to remove staging directory {:?}: {}", staging, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display_names() {
        assert_eq!(UpdatePhase::BackingUp.to_string(), "backing-up");
        assert_eq!(UpdatePhase::RollingBack.to_string(), "rolling-back");
    }
}
