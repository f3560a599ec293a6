//! Backup archives and retention.
//!
//! Before any mutation of the live installation, the well-known file set is
//! snapshotted into a timestamped zip. Archive names sort lexicographically
//! in chronological order. Restore extracts straight over the installation
//! root and is used only during rollback.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::UpdateError;
use crate::paths::{Paths, BACKUP_FILES};
use crate::version_store::{now_local, VersionRecord};

pub struct BackupManager {
    paths: Paths,
}

impl BackupManager {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// Snapshot the current installation into
    /// `backups/backup_v{version}_{YYYYMMDD_HHMMSS}.zip`. Files missing
    /// from the installation are skipped silently. No backup, no update:
    /// any I/O failure is returned to the caller as an abort condition.
    pub fn create_backup(&self, record: &VersionRecord) -> Result<PathBuf, UpdateError> {
        let backup_dir = self.paths.backup_dir();
        fs::create_dir_all(&backup_dir)
            .map_err(|e| UpdateError::Backup(format!("create {:?}: {}", backup_dir, e)))?;

        let name = format!(
            "backup_v{}_{}.zip",
            record.version,
            now_local().format("%Y%m%d_%H%M%S")
        );
        let archive_path = backup_dir.join(&name);
        info!("Creating backup {:?}", archive_path);

        self.write_archive(&archive_path).map_err(|e| {
            let _ = fs::remove_file(&archive_path);
            UpdateError::Backup(format!("write {}: {}", name, e))
        })?;

        self.prune_old_backups(record);
        Ok(archive_path)
    }

    fn write_archive(&self, archive_path: &Path) -> io::Result<()> {
        let file = File::create(archive_path)?;
        let mut archive = ZipWriter::new(file);

        for name in BACKUP_FILES {
            let source = self.paths.root().join(name);
            if !source.is_file() {
                debug!("Backup skipping missing file {}", name);
                continue;
            }

            let mut options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                options = options.unix_permissions(fs::metadata(&source)?.permissions().mode());
            }

            archive.start_file(*name, options)?;
            let mut reader = File::open(&source)?;
            io::copy(&mut reader, &mut archive)?;
            debug!("Backed up {}", name);
        }

        archive.finish()?;
        Ok(())
    }

    /// Delete archives whose modification time falls outside the retention
    /// window. Pruning failures are logged, never escalated: they must not
    /// block the update path.
    pub fn prune_old_backups(&self, record: &VersionRecord) {
        let cutoff = SystemTime::now()
            - Duration::from_secs(record.backup_retention_days.saturating_mul(86_400));
        self.prune_older_than(cutoff);
    }

    pub fn prune_older_than(&self, cutoff: SystemTime) {
        let entries = match fs::read_dir(self.paths.backup_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Backup pruning skipped: {}", e);
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !name.starts_with("backup_") || !name.ends_with(".zip") {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified());
            match modified {
                Ok(mtime) if mtime < cutoff => match fs::remove_file(entry.path()) {
                    Ok(()) => info!("Pruned old backup {}", name),
                    Err(e) => warn!("Failed to prune backup {}: {}", name, e),
                },
                Ok(_) => {}
                Err(e) => warn!("Failed to stat backup {}: {}", name, e),
            }
        }
    }

    /// Extract an archive over the installation root, overwriting current
    /// files unconditionally. Rollback-only.
    pub fn restore(&self, archive_path: &Path) -> bool {
        info!("Restoring backup {:?}", archive_path);
        let file = match File::open(archive_path) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to open backup {:?}: {}", archive_path, e);
                return false;
            }
        };
        let mut archive = match ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(e) => {
                error!("Failed to read backup {:?}: {}", archive_path, e);
                return false;
            }
        };
        if let Err(e) = archive.extract(self.paths.root()) {
            error!("Failed to restore backup {:?}: {}", archive_path, e);
            return false;
        }
        true
    }
}
