//! Release feed client and version comparison.
//!
//! Checks a GitHub-style release feed for a newer version, honoring the
//! policy gates in the version record. The throttle stamp advances only on
//! a successful feed response, so a transient failure is retried promptly
//! on the next cycle instead of waiting out a full interval.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::version_store::{now_local, VersionRecord, VersionStore};

/// Feed request timeout.
const FEED_TIMEOUT_SECS: u64 = 30;

/// Checksum-asset request timeout.
const CHECKSUM_TIMEOUT_SECS: u64 = 10;

/// Release feed wire format (GitHub releases API).
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFeedEntry {
    pub tag_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl ReleaseFeedEntry {
    /// Version from the tag, leading "v" stripped.
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }
}

/// A parsed, not-yet-downloaded newer release. Created per check, consumed
/// immediately by the orchestrator, never persisted.
#[derive(Debug, Clone)]
pub struct ReleaseCandidate {
    pub version: String,
    pub download_url: String,
    /// SHA-256 hex digest from a companion asset, when one was published
    /// and fetchable.
    pub expected_checksum: Option<String>,
    pub release_notes: String,
    pub published_at: String,
}

/// Component-wise comparison over dot-separated integers. Any component
/// that fails to parse makes the candidate not-newer (fail closed).
pub fn is_newer_version(candidate: &str, current: &str) -> bool {
    match (parse_version(candidate), parse_version(current)) {
        (Some(cand), Some(cur)) => cand > cur,
        _ => false,
    }
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    version.split('.').map(|part| part.parse().ok()).collect()
}

/// Queries the release feed and selects a downloadable artifact.
pub struct ReleaseChecker {
    store: VersionStore,
    client: reqwest::blocking::Client,
}

impl ReleaseChecker {
    pub fn new(store: VersionStore) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("vigil/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(FEED_TIMEOUT_SECS))
            .build()
            .context("Failed to build feed HTTP client")?;
        Ok(Self { store, client })
    }

    /// Returns a candidate when the feed advertises a newer version.
    ///
    /// Policy, in order: auto-update gate, throttle window, feed URL
    /// presence, then one bounded feed query. Transport and parse errors
    /// leave `last_check_timestamp` untouched.
    pub fn check_for_update(&self, record: &mut VersionRecord) -> Option<ReleaseCandidate> {
        if !record.auto_update_enabled {
            debug!("Auto-update disabled, skipping check");
            return None;
        }

        if let Some(last_check) = record.last_check_timestamp {
            let elapsed = (now_local() - last_check).num_seconds();
            if elapsed >= 0 && (elapsed as u64) < record.check_interval_secs {
                debug!("Throttled: last check {}s ago", elapsed);
                return None;
            }
        }

        let feed_url = match record.release_feed_url.as_deref() {
            Some(url) => url,
            None => {
                warn!("No release feed URL configured, skipping update check");
                return None;
            }
        };

        info!("Checking for updates at {}", feed_url);
        let release = match self.fetch_feed(feed_url) {
            Ok(release) => release,
            Err(e) => {
                warn!("Update check failed: {:#}", e);
                return None;
            }
        };

        // A successful response advances the throttle stamp whether or not
        // a newer version exists.
        record.last_check_timestamp = Some(now_local());
        if !self.store.save(record) {
            warn!("Failed to persist last-check timestamp");
        }

        let latest = release.version().to_string();
        if !is_newer_version(&latest, &record.version) {
            info!("Current version {} is up to date", record.version);
            return None;
        }

        let download_url = match self.select_download_url(&release) {
            Some(url) => url,
            None => {
                warn!("Release {} has no downloadable artifact", latest);
                return None;
            }
        };

        info!(
            "New version available: {} (current: {})",
            latest, record.version
        );
        Some(ReleaseCandidate {
            version: latest,
            download_url,
            expected_checksum: self.fetch_checksum(&release),
            release_notes: release.body.clone(),
            published_at: release.published_at.clone(),
        })
    }

    fn fetch_feed(&self, url: &str) -> Result<ReleaseFeedEntry> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .context("Failed to query release feed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Release feed returned {}", resp.status());
        }

        resp.json::<ReleaseFeedEntry>()
            .context("Failed to parse release feed")
    }

    /// Prefer a packaged .zip asset; fall back to the source zipball.
    fn select_download_url(&self, release: &ReleaseFeedEntry) -> Option<String> {
        for asset in &release.assets {
            if asset.name.ends_with(".zip") {
                return Some(asset.browser_download_url.clone());
            }
        }
        release.zipball_url.clone()
    }

    /// Locate and fetch a companion checksum asset. Any failure here is
    /// non-fatal: the candidate simply carries no checksum.
    fn fetch_checksum(&self, release: &ReleaseFeedEntry) -> Option<String> {
        for asset in &release.assets {
            let name = asset.name.to_lowercase();
            if !name.contains("sha256") && !name.contains("checksum") {
                continue;
            }
            match self.fetch_checksum_body(&asset.browser_download_url) {
                Ok(body) => {
                    if let Some(token) = body.split_whitespace().next() {
                        return Some(token.to_string());
                    }
                }
                Err(e) => {
                    warn!("Failed to fetch checksum asset {}: {:#}", asset.name, e);
                }
            }
        }
        None
    }

    fn fetch_checksum_body(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(CHECKSUM_TIMEOUT_SECS))
            .send()
            .context("Failed to fetch checksum asset")?;
        if !resp.status().is_success() {
            anyhow::bail!("Checksum asset returned {}", resp.status());
        }
        resp.text().context("Failed to read checksum asset")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Paths;
    use tempfile::TempDir;

    #[test]
    fn test_version_comparison() {
        assert!(is_newer_version("1.10.0", "1.9.9"));
        assert!(is_newer_version("2.0.0", "1.99.99"));
        assert!(is_newer_version("1.2.1", "1.2.0"));
        assert!(!is_newer_version("1.2.0", "1.2.0"));
        assert!(!is_newer_version("1.1.0", "1.2.0"));
    }

    #[test]
    fn test_version_comparison_fails_closed() {
        // Mismatched arity is not newer.
        assert!(!is_newer_version("1.2", "1.2.0"));
        // Malformed input never crashes and is never newer.
        assert!(!is_newer_version("abc", "1.0.0"));
        assert!(!is_newer_version("1.0.0", "abc"));
        assert!(!is_newer_version("", "1.0.0"));
        assert!(!is_newer_version("1.2.x", "1.0.0"));
    }

    #[test]
    fn test_longer_tuple_wins() {
        assert!(is_newer_version("1.2.0", "1.2"));
        assert!(is_newer_version("1.2.0.1", "1.2.0"));
    }

    #[test]
    fn test_tag_strips_leading_v() {
        let release = ReleaseFeedEntry {
            tag_name: "v1.4.0".to_string(),
            body: String::new(),
            published_at: String::new(),
            zipball_url: None,
            assets: vec![],
        };
        assert_eq!(release.version(), "1.4.0");
    }

    #[test]
    fn test_throttle_suppresses_network_call() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(&Paths::new(dir.path()));
        let checker = ReleaseChecker::new(store.clone()).unwrap();

        let mut record = store.load();
        // Feed URL points nowhere routable; the throttle must return before
        // any connection is attempted.
        record.release_feed_url = Some("http://127.0.0.1:1/releases".to_string());
        record.check_interval_secs = 86_400;
        record.last_check_timestamp = Some(now_local());
        let stamp_before = record.last_check_timestamp;

        assert!(checker.check_for_update(&mut record).is_none());
        assert_eq!(record.last_check_timestamp, stamp_before);
    }

    #[test]
    fn test_disabled_gate_short_circuits() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(&Paths::new(dir.path()));
        let checker = ReleaseChecker::new(store.clone()).unwrap();

        let mut record = store.load();
        record.auto_update_enabled = false;
        record.release_feed_url = Some("http://127.0.0.1:1/releases".to_string());
        assert!(checker.check_for_update(&mut record).is_none());
    }

    #[test]
    fn test_missing_feed_url_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(&Paths::new(dir.path()));
        let checker = ReleaseChecker::new(store.clone()).unwrap();

        let mut record = store.load();
        record.release_feed_url = None;
        assert!(checker.check_for_update(&mut record).is_none());
        assert!(record.last_check_timestamp.is_none());
    }

    #[test]
    fn test_zip_asset_preferred_over_zipball() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(&Paths::new(dir.path()));
        let checker = ReleaseChecker::new(store).unwrap();

        let release = ReleaseFeedEntry {
            tag_name: "v2.0.0".to_string(),
            body: String::new(),
            published_at: String::new(),
            zipball_url: Some("https://example.invalid/zipball".to_string()),
            assets: vec![
                ReleaseAsset {
                    name: "notes.txt".to_string(),
                    browser_download_url: "https://example.invalid/notes".to_string(),
                },
                ReleaseAsset {
                    name: "vigil-2.0.0.zip".to_string(),
                    browser_download_url: "https://example.invalid/pkg.zip".to_string(),
                },
            ],
        };
        assert_eq!(
            checker.select_download_url(&release).as_deref(),
            Some("https://example.invalid/pkg.zip")
        );

        let bare = ReleaseFeedEntry {
            assets: vec![],
            ..release
        };
        assert_eq!(
            checker.select_download_url(&bare).as_deref(),
            Some("https://example.invalid/zipball")
        );
    }
}
