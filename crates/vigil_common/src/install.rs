//! Artifact installation.
//!
//! Stops the daemon, extracts the verified artifact into staging, locates
//! the payload root, copies the well-known updatable files over the live
//! installation, and advances the version record. The process is restarted
//! by the validator, not here.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::UpdateError;
use crate::paths::{Paths, MAIN_EXECUTABLE, UPDATE_FILES};
use crate::release::ReleaseCandidate;
use crate::service::ServiceControl;
use crate::version_store::VersionStore;

pub struct Installer {
    paths: Paths,
    store: VersionStore,
    service: Arc<dyn ServiceControl>,
}

impl Installer {
    pub fn new(paths: Paths, store: VersionStore, service: Arc<dyn ServiceControl>) -> Self {
        Self {
            paths,
            store,
            service,
        }
    }

    /// Install a verified artifact. Aborts before any mutation if the
    /// process cannot be stopped; fails hard if the artifact carries none
    /// of the updatable files, so the version record never advances past
    /// an empty payload.
    pub fn install(
        &self,
        artifact: &Path,
        candidate: &ReleaseCandidate,
    ) -> Result<(), UpdateError> {
        info!("Installing update {}", candidate.version);

        if !self.service.stop() {
            return Err(UpdateError::Install(
                "failed to stop the service; aborting before touching live files".to_string(),
            ));
        }

        let extract_dir = self.extract_artifact(artifact)?;
        let payload_root = locate_payload_root(&extract_dir);
        debug!("Payload root: {:?}", payload_root);

        let copied = self.copy_updated_files(&payload_root)?;
        if copied == 0 {
            return Err(UpdateError::Install(format!(
                "artifact for {} contains none of the expected files",
                candidate.version
            )));
        }
        info!("Updated {} file(s) from artifact", copied);

        let mut record = self.store.load();
        if !self
            .store
            .record_installed(&mut record, &candidate.version)
        {
            return Err(UpdateError::Install(
                "installed files but failed to persist the version record".to_string(),
            ));
        }
        Ok(())
    }

    fn extract_artifact(&self, artifact: &Path) -> Result<PathBuf, UpdateError> {
        let extract_dir = self.paths.extract_dir();
        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir)
                .map_err(|e| UpdateError::Install(format!("clear {:?}: {}", extract_dir, e)))?;
        }
        fs::create_dir_all(&extract_dir)
            .map_err(|e| UpdateError::Install(format!("create {:?}: {}", extract_dir, e)))?;

        let file = File::open(artifact)
            .map_err(|e| UpdateError::Install(format!("open {:?}: {}", artifact, e)))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| UpdateError::Install(format!("read {:?}: {}", artifact, e)))?;
        archive
            .extract(&extract_dir)
            .map_err(|e| UpdateError::Install(format!("extract {:?}: {}", artifact, e)))?;
        Ok(extract_dir)
    }

    fn copy_updated_files(&self, payload_root: &Path) -> Result<usize, UpdateError> {
        let mut copied = 0;
        for name in UPDATE_FILES {
            let source = payload_root.join(name);
            if !source.is_file() {
                debug!("Artifact does not carry {}", name);
                continue;
            }
            let dest = self.paths.root().join(name);
            fs::copy(&source, &dest)
                .map_err(|e| UpdateError::Install(format!("copy {}: {}", name, e)))?;

            // Binaries (extensionless entries) must stay executable.
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if !name.contains('.') {
                    fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
                        .map_err(|e| UpdateError::Install(format!("chmod {}: {}", name, e)))?;
                }
            }

            info!("Updated {}", name);
            copied += 1;
        }
        Ok(copied)
    }
}

/// Find the directory containing the main executable inside an extracted
/// artifact (release zipballs nest their payload under a top-level
/// directory). Falls back to the extraction root.
fn locate_payload_root(extract_dir: &Path) -> PathBuf {
    for entry in WalkDir::new(extract_dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.file_name() == MAIN_EXECUTABLE {
            if let Some(parent) = entry.path().parent() {
                return parent.to_path_buf();
            }
        }
    }
    extract_dir.to_path_buf()
}
