//! Artifact download with integrity verification.
//!
//! Streams the release artifact into the staging directory in bounded
//! chunks. When the candidate carries a checksum, the file's SHA-256 is
//! computed in a streaming pass and compared case-insensitively; a mismatch
//! deletes the corrupt file and fails the attempt. Without a checksum the
//! artifact is trusted as-is.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::UpdateError;
use crate::paths::Paths;
use crate::release::ReleaseCandidate;

/// Overall timeout for one artifact download. Payloads can be large.
const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const CHUNK_SIZE: usize = 8192;

pub struct Downloader {
    paths: Paths,
    client: reqwest::blocking::Client,
}

impl Downloader {
    pub fn new(paths: Paths) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("vigil/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .context("Failed to build download HTTP client")?;
        Ok(Self { paths, client })
    }

    /// Fetch the candidate's artifact into
    /// `update_staging/update_v{version}.zip` and verify it.
    pub fn download(&self, candidate: &ReleaseCandidate) -> Result<PathBuf, UpdateError> {
        let staging = self.paths.staging_dir();
        fs::create_dir_all(&staging)
            .map_err(|e| UpdateError::Network(format!("create {:?}: {}", staging, e)))?;

        let dest = staging.join(format!("update_v{}.zip", candidate.version));
        info!("Downloading update from {}", candidate.download_url);

        if let Err(e) = self.stream_to_file(&candidate.download_url, &dest) {
            let _ = fs::remove_file(&dest);
            return Err(UpdateError::Network(format!("{:#}", e)));
        }

        if let Some(expected) = candidate.expected_checksum.as_deref() {
            let actual = sha256_of(&dest)
                .map_err(|e| UpdateError::Network(format!("hash {:?}: {}", dest, e)))?;
            if !actual.eq_ignore_ascii_case(expected) {
                warn!("Checksum mismatch, deleting corrupt artifact {:?}", dest);
                let _ = fs::remove_file(&dest);
                return Err(UpdateError::Integrity {
                    expected: expected.to_lowercase(),
                    actual,
                });
            }
            info!("Checksum verified for {:?}", dest);
        } else {
            warn!("No checksum published for {}; artifact trusted as-is", candidate.version);
        }

        Ok(dest)
    }

    fn stream_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .context("Download request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Download returned {}", resp.status());
        }

        let mut file = File::create(dest).with_context(|| format!("create {:?}", dest))?;
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = resp.read(&mut buffer).context("Download read failed")?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).context("Download write failed")?;
            total += n as u64;
        }
        info!("Downloaded {} bytes to {:?}", total, dest);
        Ok(())
    }
}

/// Streaming SHA-256 over a file, hex-encoded lowercase.
pub fn sha256_of(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
