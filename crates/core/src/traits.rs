use crate::types::{CandleBatch, RawRate, Timeframe};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Terminal details returned by a successful liveness probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalInfo {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub build: Option<u32>,
    #[serde(default)]
    pub ping_last: Option<u64>,
}

/// The terminal that supplies raw candle rows.
///
/// Implementations are driven by the connection manager; callers never
/// retry inside a single call.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Establishes the link to the terminal.
    async fn initialize(&self) -> Result<()>;

    /// Cheap liveness check. Any error means the link is unusable.
    async fn probe(&self) -> Result<TerminalInfo>;

    /// Returns up to `count` rows starting `offset` bars back from the newest.
    ///
    /// An error or an empty vector both mean "no data for this pair right now".
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        offset: usize,
        count: usize,
    ) -> Result<Vec<RawRate>>;

    /// Releases the link. Must tolerate being called on a dead link.
    async fn shutdown(&self);
}

/// Remote endpoint that accepts converted candle batches.
#[async_trait]
pub trait CandleSink: Send + Sync {
    async fn send(&self, batch: &CandleBatch) -> Result<()>;
}
