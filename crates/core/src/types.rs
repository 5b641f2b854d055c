//! Domain types shared by the collector and its collaborators.
//!
//! Candles are produced fresh every poll from the raw rows returned by the
//! terminal and are never mutated afterwards.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Instrument identifier as configured in the watch-list (e.g. "EURUSD").
pub type Symbol = String;

/// Candle granularity supported by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
}

impl Timeframe {
    /// All supported timeframes, shortest first.
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
    ];

    /// Returns the configuration / wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
        }
    }

    /// Returns the MetaTrader 5 `TIMEFRAME_*` constant.
    #[must_use]
    pub fn mt5_code(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            // TIMEFRAME_H1 = 1 | 0x4000
            Timeframe::H1 => 16385,
        }
    }

    /// Returns the bucket length.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::M5 => Duration::from_secs(300),
            Timeframe::M15 => Duration::from_secs(900),
            Timeframe::M30 => Duration::from_secs(1_800),
            Timeframe::H1 => Duration::from_secs(3_600),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            _ => Err(anyhow!(
                "Unsupported timeframe: '{}'. Valid values: M1, M5, M15, M30, H1",
                s
            )),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.as_str().to_string()
    }
}

/// One row as returned by the terminal's `copy_rates_from_pos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRate {
    /// Bucket open time, seconds since the Unix epoch (UTC)
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: u64,
}

/// A single OHLCV record with its timestamp in the canonical zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub time: DateTime<Tz>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Converts a raw row, returning `None` when the epoch is out of range.
    #[must_use]
    pub fn from_raw(raw: &RawRate, tz: Tz) -> Option<Self> {
        let utc = Utc.timestamp_opt(raw.time, 0).single()?;
        Some(Self {
            time: utc.with_timezone(&tz),
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.tick_volume as f64,
        })
    }
}

/// Candles for one (symbol, timeframe) pair, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleBatch {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl CandleBatch {
    /// Builds a batch from raw rows.
    ///
    /// Rows are ordered by time and only the newest `max_len` are kept.
    /// Rows whose timestamp cannot be represented are dropped.
    #[must_use]
    pub fn from_rates(
        symbol: &str,
        timeframe: Timeframe,
        rows: &[RawRate],
        tz: Tz,
        max_len: usize,
    ) -> Self {
        let mut candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Candle::from_raw(row, tz))
            .collect();
        candles.sort_by_key(|c| c.time);

        if candles.len() > max_len {
            candles.drain(..candles.len() - max_len);
        }

        Self {
            symbol: symbol.to_string(),
            timeframe,
            candles,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Timestamp of the newest candle in the batch.
    #[must_use]
    pub fn newest(&self) -> Option<DateTime<Tz>> {
        self.candles.last().map(|c| c.time)
    }
}
