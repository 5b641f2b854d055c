//! Error types for the collector.
//!
//! Only [`ReconnectError::Exhausted`] is allowed to stop the process; every
//! other variant is logged and retried on a later tick or cycle.

use thiserror::Error;

/// Failure to establish the link to the market data source.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("market data source failed to initialize: {0}")]
    Initialize(String),

    #[error("connection has been shut down")]
    ShutDown,
}

/// Outcome of a failed reconnect sequence.
#[derive(Debug, Error)]
pub enum ReconnectError {
    /// One attempt failed; another may follow.
    #[error("reconnect attempt {attempt}/{max_attempts} failed: {reason}")]
    Failed {
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },

    /// The attempt budget is spent. Terminal.
    #[error("giving up after {attempts} failed reconnect attempts")]
    Exhausted { attempts: u32 },

    /// Shutdown was requested before the attempt completed.
    #[error("reconnect cancelled by shutdown")]
    Cancelled,
}

impl ReconnectError {
    /// Returns true when the whole system must stop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconnectError::Exhausted { .. })
    }
}

/// Failure to deliver a batch to the remote sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sink rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors from state snapshot persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to replace snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Terminal outcome of a collector run.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}
