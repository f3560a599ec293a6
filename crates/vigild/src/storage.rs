//! Telemetry persistence.
//!
//! SQLite store for collected snapshots. The schema is applied from the
//! installation's `schema.sql` when present (the updater may ship a newer
//! one), otherwise from an embedded fallback.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::{debug, info};
use vigil_common::Paths;

use crate::telemetry::TelemetrySnapshot;

const FALLBACK_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS telemetry (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    collected_at TEXT NOT NULL,
    hostname     TEXT NOT NULL,
    os           TEXT NOT NULL,
    uptime_secs  INTEGER NOT NULL,
    external_ip  TEXT,
    wifi_ssid    TEXT,
    wifi_signal  INTEGER
);
";

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open the database and apply the schema.
    pub fn open(paths: &Paths) -> Result<Self> {
        let db_path = paths.database();
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?;

        let schema_file = paths.schema_file();
        let schema = if schema_file.is_file() {
            debug!("Applying schema from {:?}", schema_file);
            std::fs::read_to_string(&schema_file)
                .with_context(|| format!("Failed to read {:?}", schema_file))?
        } else {
            FALLBACK_SCHEMA.to_string()
        };
        conn.execute_batch(&schema).context("Failed to apply schema")?;

        info!("Telemetry database ready at {:?}", db_path);
        Ok(Self { conn })
    }

    pub fn insert_snapshot(&self, snapshot: &TelemetrySnapshot) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO telemetry
                 (collected_at, hostname, os, uptime_secs, external_ip, wifi_ssid, wifi_signal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    snapshot.collected_at.to_rfc3339(),
                    snapshot.hostname,
                    snapshot.os,
                    snapshot.uptime_secs as i64,
                    snapshot.external_ip,
                    snapshot.wifi_ssid,
                    snapshot.wifi_signal,
                ],
            )
            .context("Failed to insert telemetry snapshot")?;
        Ok(())
    }

    pub fn row_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .context("Failed to count telemetry rows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vigil_common::now_local;

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            collected_at: now_local(),
            hostname: "host-1".to_string(),
            os: "Linux 6.1".to_string(),
            uptime_secs: 1234,
            external_ip: Some("203.0.113.7".to_string()),
            wifi_ssid: Some("office".to_string()),
            wifi_signal: Some(72),
        }
    }

    #[test]
    fn test_insert_and_count() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(&Paths::new(dir.path())).unwrap();
        storage.insert_snapshot(&snapshot()).unwrap();
        storage.insert_snapshot(&snapshot()).unwrap();
        assert_eq!(storage.row_count().unwrap(), 2);
    }

    #[test]
    fn test_schema_file_takes_precedence() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("schema.sql"),
            "CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collected_at TEXT NOT NULL,
                hostname TEXT NOT NULL,
                os TEXT NOT NULL,
                uptime_secs INTEGER NOT NULL,
                external_ip TEXT,
                wifi_ssid TEXT,
                wifi_signal INTEGER,
                extra TEXT
            );",
        )
        .unwrap();

        let storage = Storage::open(&Paths::new(dir.path())).unwrap();
        storage.insert_snapshot(&snapshot()).unwrap();
        assert_eq!(storage.row_count().unwrap(), 1);
    }
}
