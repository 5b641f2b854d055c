//! Foreground polling cycle.
//!
//! Each cycle walks the (symbol x timeframe) matrix in configuration order,
//! symbols outer, and forwards one batch per pair. Per-pair failures are
//! contained to that pair; only reconnect exhaustion ends the loop with an
//! error. Cycles are paced start to start.

use crate::connection::ConnectionManager;
use crate::error::ReconnectError;
use crate::run_flag::RunFlag;
use crate::state_store::{PersistedProgress, StateStore};
use crate::stats::{CollectorStats, CycleReport};
use candle_relay_core::{CandleBatch, CandleSink, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What the poll loop iterates and how often.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub symbols: Vec<Symbol>,
    pub timeframes: Vec<Timeframe>,
    /// Candles requested per pair
    pub candle_count: usize,
    /// Cycle cadence, start to start
    pub interval: Duration,
    /// Canonical zone for outgoing timestamps
    pub timezone: Tz,
}

enum PairOutcome {
    Sent { at: DateTime<Utc> },
    NoData,
    SendFailed,
}

pub struct PollLoop {
    connection: Arc<ConnectionManager>,
    sink: Arc<dyn CandleSink>,
    store: StateStore,
    settings: PollSettings,
    run_flag: RunFlag,
    progress: PersistedProgress,
    stats: CollectorStats,
}

impl PollLoop {
    pub fn new(
        connection: Arc<ConnectionManager>,
        sink: Arc<dyn CandleSink>,
        store: StateStore,
        settings: PollSettings,
        run_flag: RunFlag,
        progress: PersistedProgress,
    ) -> Self {
        Self {
            connection,
            sink,
            store,
            settings,
            run_flag,
            progress,
            stats: CollectorStats::default(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> &PersistedProgress {
        &self.progress
    }

    #[must_use]
    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Runs cycles until the run flag is cleared.
    ///
    /// Progress is persisted after every cycle, including the last one.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::Exhausted`] when the link cannot be
    /// restored; the run flag is cleared before returning.
    pub async fn run(&mut self) -> Result<(), ReconnectError> {
        info!(
            symbols = self.settings.symbols.len(),
            timeframes = self.settings.timeframes.len(),
            interval_secs = self.settings.interval.as_secs_f64(),
            "Starting data collection"
        );

        while self.run_flag.is_running() {
            let started = Instant::now();
            let result = self.run_cycle().await;
            self.persist();

            match result {
                Ok(report) => {
                    self.stats.record_cycle(&report);
                    info!(
                        sent = report.sent,
                        fetch_failures = report.fetch_failures,
                        send_failures = report.send_failures,
                        skipped = report.skipped,
                        "Cycle complete. {}",
                        self.stats.summary()
                    );
                }
                Err(e) => {
                    error!(error = %e, "Poll loop stopping, connection cannot be restored");
                    self.run_flag.stop();
                    return Err(e);
                }
            }

            let wait = self.settings.interval.saturating_sub(started.elapsed());
            debug!(wait_secs = wait.as_secs_f64(), "Waiting for next cycle");
            if !self.run_flag.sleep(wait).await {
                break;
            }
        }

        info!("Data collection stopped");
        Ok(())
    }

    /// Runs a single pass over the matrix without sleeping or persisting.
    ///
    /// # Errors
    ///
    /// Returns an error only when reconnect attempts are exhausted.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, ReconnectError> {
        let mut report = CycleReport::default();

        match self.connection.ensure_connected().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Market data source unavailable, skipping cycle");
                report.skipped = true;
                return Ok(report);
            }
        }

        'matrix: for symbol in &self.settings.symbols {
            for &timeframe in &self.settings.timeframes {
                if !self.run_flag.is_running() {
                    info!("Stop requested, leaving remaining pairs for the next run");
                    report.interrupted = true;
                    break 'matrix;
                }

                match self.poll_pair(symbol, timeframe).await {
                    PairOutcome::Sent { at } => {
                        report.sent += 1;
                        self.progress.record_success(symbol, timeframe, at);
                        self.stats.batch_sent(at);
                    }
                    PairOutcome::SendFailed => report.send_failures += 1,
                    PairOutcome::NoData => {
                        report.fetch_failures += 1;
                        // A missing window is either a gap for this pair or a
                        // dead link; only the latter stops the cycle
                        match self.connection.ensure_connected().await {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    "Link lost mid-cycle, remaining pairs deferred to next cycle"
                                );
                                report.interrupted = true;
                                break 'matrix;
                            }
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn poll_pair(&self, symbol: &str, timeframe: Timeframe) -> PairOutcome {
        let count = self.settings.candle_count;
        let source = self.connection.source();

        let rows = match source.fetch(symbol, timeframe, 0, count).await {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => {
                warn!(symbol, timeframe = %timeframe, "No candle data returned");
                return PairOutcome::NoData;
            }
            Err(e) => {
                warn!(symbol, timeframe = %timeframe, error = %e, "Failed to fetch candle data");
                return PairOutcome::NoData;
            }
        };

        let batch = CandleBatch::from_rates(symbol, timeframe, &rows, self.settings.timezone, count);
        if batch.is_empty() {
            warn!(
                symbol,
                timeframe = %timeframe,
                rows = rows.len(),
                "Every row had an invalid timestamp"
            );
            return PairOutcome::NoData;
        }

        match self.sink.send(&batch).await {
            Ok(()) => {
                info!(
                    symbol,
                    timeframe = %timeframe,
                    candles = batch.len(),
                    newest = ?batch.newest(),
                    "Sent candle data to server"
                );
                PairOutcome::Sent { at: Utc::now() }
            }
            Err(e) => {
                error!(symbol, timeframe = %timeframe, error = %e, "Failed to send candle data");
                PairOutcome::SendFailed
            }
        }
    }

    /// Writes the current progress, including connection counters.
    ///
    /// A failed save is logged; the previous snapshot stays in place.
    pub fn persist(&mut self) {
        self.progress.connection_attempts = self.connection.attempts();
        self.progress.last_connection_time = self.connection.last_connection_time();

        if let Err(e) = self.store.save(&self.progress) {
            error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist collector state"
            );
        }
    }
}
