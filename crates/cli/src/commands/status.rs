//! status CLI command.
//!
//! Reads the persisted progress snapshot and shows, per pair, when data was
//! last relayed. Does not contact the terminal or the collector.

use anyhow::Result;
use candle_relay_collector::{PersistedProgress, StateStore};
use candle_relay_core::ConfigLoader;
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the status command.
#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Config file path
    #[arg(short, long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,

    /// Read this snapshot instead of the configured state file
    #[arg(long)]
    pub state_file: Option<PathBuf>,
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h {}m ago", s / 3600, (s % 3600) / 60),
        s => format!("{}d ago", s / 86_400),
    }
}

fn render(progress: &PersistedProgress, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    if progress.last_data_time.is_empty() {
        out.push_str("No pairs relayed yet\n");
    } else {
        out.push_str(&format!("{:<20} {:<22} {}\n", "PAIR", "LAST SUCCESS (UTC)", "AGE"));
        for (key, at) in &progress.last_data_time {
            out.push_str(&format!(
                "{:<20} {:<22} {}\n",
                key,
                at.format("%Y-%m-%d %H:%M:%S"),
                format_age(*at, now)
            ));
        }
    }

    out.push_str(&format!(
        "Connection attempts: {}\n",
        progress.connection_attempts
    ));
    let last_connection = progress
        .last_connection_time
        .map(|t| format!("{} ({})", t.format("%Y-%m-%d %H:%M:%S"), format_age(t, now)))
        .unwrap_or_else(|| "never".to_string());
    out.push_str(&format!("Last connection: {last_connection}\n"));
    out
}

/// Runs the status command.
///
/// # Errors
/// Returns an error if the configuration cannot be parsed or the snapshot
/// exists but is unreadable.
pub fn run_status(args: StatusArgs) -> Result<()> {
    let path = match args.state_file {
        Some(path) => path,
        // Placeholders are fine here; only the state file location is needed
        None => ConfigLoader::extract(&args.config)?.collector.state_file,
    };
    let store = StateStore::new(path);

    if !store.exists() {
        println!("No collector state at {}", store.path().display());
        return Ok(());
    }

    let progress = store.load_raw()?;
    println!("State file: {}", store.path().display());
    print!("{}", render(&progress, Utc::now()));
    Ok(())
}
