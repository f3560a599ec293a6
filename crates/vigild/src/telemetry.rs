//! Host telemetry collection.
//!
//! Thin glue around sysinfo, an external-IP lookup, and nmcli. Every field
//! that depends on the outside world is optional; collection never fails as
//! a whole.

use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use sysinfo::System;
use tracing::{debug, warn};
use vigil_common::now_local;

/// External-IP lookup endpoint.
const IP_ENDPOINT: &str = "https://api.ipify.org";

const IP_TIMEOUT_SECS: u64 = 10;

/// One collected telemetry row.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub collected_at: DateTime<FixedOffset>,
    pub hostname: String,
    pub os: String,
    pub uptime_secs: u64,
    pub external_ip: Option<String>,
    pub wifi_ssid: Option<String>,
    pub wifi_signal: Option<u8>,
}

pub struct Collector {
    client: Option<reqwest::blocking::Client>,
}

impl Collector {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(IP_TIMEOUT_SECS))
            .build()
            .map_err(|e| warn!("External IP lookups disabled: {}", e))
            .ok();
        Self { client }
    }

    pub fn collect(&self) -> TelemetrySnapshot {
        let (wifi_ssid, wifi_signal) = match wifi_link() {
            Some((ssid, signal)) => (Some(ssid), signal),
            None => (None, None),
        };

        TelemetrySnapshot {
            collected_at: now_local(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
            uptime_secs: System::uptime(),
            external_ip: self.external_ip(),
            wifi_ssid,
            wifi_signal,
        }
    }

    fn external_ip(&self) -> Option<String> {
        let client = self.client.as_ref()?;
        match client.get(IP_ENDPOINT).send().and_then(|r| r.text()) {
            Ok(ip) => {
                let ip = ip.trim().to_string();
                (!ip.is_empty()).then_some(ip)
            }
            Err(e) => {
                debug!("External IP lookup failed: {}", e);
                None
            }
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

/// Active Wi-Fi link via nmcli, if any.
fn wifi_link() -> Option<(String, Option<u8>)> {
    let output = Command::new("nmcli")
        .args(["-t", "-f", "ACTIVE,SSID,SIGNAL", "dev", "wifi"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let mut fields = line.split(':');
        if fields.next() != Some("yes") {
            continue;
        }
        let ssid = fields.next().unwrap_or("").to_string();
        if ssid.is_empty() {
            continue;
        }
        let signal = fields.next().and_then(|s| s.parse().ok());
        return Some((ssid, signal));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_has_host_basics() {
        // No network assertions here; only the always-available fields.
        let snapshot = Collector { client: None }.collect();
        assert!(!snapshot.hostname.is_empty());
        assert!(!snapshot.os.is_empty());
        assert_eq!(snapshot.collected_at.offset().local_minus_utc(), -3 * 3600);
    }
}
