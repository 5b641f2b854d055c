//! Progress persistence for surviving restarts.
//!
//! The snapshot is a single JSON document:
//!
//! ```json
//! {
//!   "last_data_time": { "EURUSD_M1": "2024-01-30T12:00:00Z" },
//!   "connection_attempts": 0,
//!   "last_connection_time": "2024-01-30T11:58:02Z"
//! }
//! ```
//!
//! Saves go to a temporary file in the same directory which is then renamed
//! over the previous snapshot, so a crash mid-write leaves the last complete
//! snapshot in place. A missing or unreadable snapshot loads as empty.

use crate::error::PersistenceError;
use candle_relay_core::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Progress recorded across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedProgress {
    /// Last successful fetch-and-send per `<symbol>_<timeframe>`
    pub last_data_time: BTreeMap<String, DateTime<Utc>>,
    pub connection_attempts: u32,
    pub last_connection_time: Option<DateTime<Utc>>,
}

impl PersistedProgress {
    /// Snapshot key for a pair.
    #[must_use]
    pub fn key(symbol: &str, timeframe: Timeframe) -> String {
        format!("{symbol}_{timeframe}")
    }

    pub fn record_success(&mut self, symbol: &str, timeframe: Timeframe, at: DateTime<Utc>) {
        self.last_data_time.insert(Self::key(symbol, timeframe), at);
    }

    #[must_use]
    pub fn last_success(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.last_data_time.get(&Self::key(symbol, timeframe)).copied()
    }
}

/// Reads and writes the progress snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the snapshot, falling back to an empty one.
    ///
    /// Never fails: a missing file is normal on first start and a corrupt
    /// file is logged and treated as "no prior state".
    #[must_use]
    pub fn load(&self) -> PersistedProgress {
        if !self.path.exists() {
            info!(
                path = %self.path.display(),
                "No collector state found, starting fresh"
            );
            return PersistedProgress::default();
        }

        match self.load_raw() {
            Ok(progress) => {
                info!(
                    path = %self.path.display(),
                    pairs = progress.last_data_time.len(),
                    connection_attempts = progress.connection_attempts,
                    "Loaded collector state"
                );
                progress
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to load collector state, starting fresh"
                );
                PersistedProgress::default()
            }
        }
    }

    /// Loads the snapshot without the fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or is not a valid snapshot.
    pub fn load_raw(&self) -> Result<PersistedProgress, PersistenceError> {
        let file = File::open(&self.path)?;
        let progress = serde_json::from_reader(BufReader::new(file))?;
        Ok(progress)
    }

    /// Atomically replaces the snapshot.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn save(&self, progress: &PersistedProgress) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, progress)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!(
            path = %self.path.display(),
            pairs = progress.last_data_time.len(),
            connection_attempts = progress.connection_attempts,
            "Saved collector state"
        );

        Ok(())
    }
}
