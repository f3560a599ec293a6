//! Vigil Control - Read-only operator CLI.
//!
//! Inspects the version record, backup archives, and recent telemetry rows
//! of a vigil installation. Never mutates the installation; that is the
//! daemon's update engine's job.

use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use rusqlite::Connection;
use vigil_common::{Paths, VersionStore};

#[derive(Parser)]
#[command(name = "vigilctl", version, about = "Inspect a vigil installation")]
struct Cli {
    /// Installation root (defaults to VIGIL_HOME or the executable's
    /// directory).
    #[arg(long)]
    home: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the version record, update policy, and latest backups.
    Status,
    /// Show the most recent telemetry rows.
    Recent {
        /// Number of rows to show.
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Probe the telemetry database.
    CheckDb,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = match cli.home {
        Some(home) => Paths::new(home),
        None => Paths::resolve(),
    };

    match cli.command {
        Commands::Status => show_status(&paths),
        Commands::Recent { limit } => show_recent(&paths, limit),
        Commands::CheckDb => check_db(&paths),
    }
}

fn show_status(paths: &Paths) -> Result<()> {
    let record = VersionStore::new(paths).load();

    println!("{}", "Vigil installation".bold());
    println!("  root:            {}", paths.root().display());
    println!("  version:         {}", record.version.green());
    println!("  built:           {}", record.build_timestamp);
    println!("  last update:     {}", record.last_update_timestamp);
    println!(
        "  auto-update:     {}",
        if record.auto_update_enabled {
            "enabled".green().to_string()
        } else {
            "disabled".red().to_string()
        }
    );
    println!("  check interval:  {}s", record.check_interval_secs);
    match &record.last_check_timestamp {
        Some(stamp) => println!("  last check:      {}", stamp),
        None => println!("  last check:      {}", "never".dimmed()),
    }
    match &record.release_feed_url {
        Some(url) => println!("  feed:            {}", url),
        None => println!("  feed:            {}", "not configured".yellow()),
    }
    println!("  retention:       {} days", record.backup_retention_days);

    let mut backups: Vec<String> = match fs::read_dir(paths.backup_dir()) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("backup_") && name.ends_with(".zip"))
            .collect(),
        Err(_) => Vec::new(),
    };
    // Names embed a fixed-width timestamp: lexicographic is chronological.
    backups.sort();

    println!();
    if backups.is_empty() {
        println!("{}", "No backups".dimmed());
    } else {
        println!("{} ({})", "Backups".bold(), backups.len());
        for name in backups.iter().rev().take(5) {
            println!("  {}", name);
        }
    }
    Ok(())
}

fn show_recent(paths: &Paths, limit: u32) -> Result<()> {
    let conn = open_db(paths)?;
    let mut stmt = conn
        .prepare(
            "SELECT collected_at, hostname, uptime_secs, external_ip, wifi_ssid, wifi_signal
             FROM telemetry ORDER BY id DESC LIMIT ?1",
        )
        .context("Failed to query telemetry")?;

    let rows = stmt
        .query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })
        .context("Failed to read telemetry rows")?;

    let mut any = false;
    for row in rows {
        let (collected_at, hostname, uptime, ip, ssid, signal) = row?;
        any = true;
        let wifi = match (ssid, signal) {
            (Some(ssid), Some(signal)) => format!("{} ({}%)", ssid, signal),
            (Some(ssid), None) => ssid,
            _ => "-".to_string(),
        };
        println!(
            "{}  {}  up {:>6}s  ip {}  wifi {}",
            collected_at.dimmed(),
            hostname.bold(),
            uptime,
            ip.unwrap_or_else(|| "-".to_string()),
            wifi
        );
    }
    if !any {
        println!("{}", "No telemetry recorded yet".dimmed());
    }
    Ok(())
}

fn check_db(paths: &Paths) -> Result<()> {
    let conn = open_db(paths)?;
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
        .context("Telemetry table missing or unreadable")?;
    println!(
        "{} {} rows in {}",
        "OK".green().bold(),
        count,
        paths.database().display()
    );
    Ok(())
}

fn open_db(paths: &Paths) -> Result<Connection> {
    let db_path = paths.database();
    if !db_path.exists() {
        anyhow::bail!("No database at {:?}; has the daemon run yet?", db_path);
    }
    Connection::open(&db_path).with_context(|| format!("Failed to open {:?}", db_path))
}
