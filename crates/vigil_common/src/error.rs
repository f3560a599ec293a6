//! Update engine error taxonomy.
//!
//! Every component boundary reports failure through these variants instead
//! of aborting the process. Only the scheduler loop in the daemon catches
//! and continues across cycles.

use thiserror::Error;

/// Failure classes of a single update attempt.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Feed, download, or checksum-asset transport failure. Treated as
    /// "no update this cycle", never retried within the same cycle.
    #[error("network error: {0}")]
    Network(String),

    /// Downloaded artifact does not match the published checksum. Fatal to
    /// the attempt; the corrupt file is deleted.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Backup creation failed. No backup, no update.
    #[error("backup failed: {0}")]
    Backup(String),

    /// Install failed; live files may be partially updated.
    #[error("install failed: {0}")]
    Install(String),

    /// Post-install validation failed; triggers rollback.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rollback failed; both new and restored state may be inconsistent.
    #[error("rollback failed: {0}")]
    Rollback(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpdateError::Integrity {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(err.to_string(), "checksum mismatch: expected aa, got bb");
    }
}
