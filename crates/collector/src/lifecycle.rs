//! Startup, run, and graceful shutdown of the collector.
//!
//! Startup loads persisted progress, initializes the source, and starts the
//! health monitor next to the poll loop. Shutdown is ordered: clear the run
//! flag, persist, wait (bounded) for the health monitor, then release the
//! source link. Signal handlers do nothing but clear the run flag.

use crate::connection::{ConnectionManager, ConnectionSettings};
use crate::error::{CollectorError, ReconnectError};
use crate::health::{HealthMonitor, HealthReport};
use crate::poll_loop::{PollLoop, PollSettings};
use crate::run_flag::RunFlag;
use crate::state_store::{PersistedProgress, StateStore};
use crate::stats::CollectorStats;
use candle_relay_core::{AppConfig, CandleSink, MarketDataSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub connection: ConnectionSettings,
    pub poll: PollSettings,
    pub health_check_interval: Duration,
    /// Upper bound on waiting for the health monitor at shutdown
    pub shutdown_timeout: Duration,
}

impl LifecycleSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            connection: ConnectionSettings {
                reconnect_delay: config.mt5.reconnect_delay,
                max_attempts: config.mt5.max_reconnect_attempts,
            },
            poll: PollSettings {
                symbols: config.mt5.symbols.clone(),
                timeframes: config.mt5.timeframes.clone(),
                candle_count: config.mt5.candle_count,
                interval: config.mt5.poll_interval,
                timezone: config.collector.timezone,
            },
            health_check_interval: config.mt5.health_check_interval,
            shutdown_timeout: config.collector.shutdown_timeout,
        }
    }
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: CollectorStats,
    pub progress: PersistedProgress,
    /// `None` when the monitor did not finish within the shutdown timeout
    pub health: Option<HealthReport>,
}

pub struct LifecycleController {
    settings: LifecycleSettings,
    source: Arc<dyn MarketDataSource>,
    sink: Arc<dyn CandleSink>,
    store: StateStore,
    run_flag: RunFlag,
}

impl LifecycleController {
    pub fn new(
        settings: LifecycleSettings,
        source: Arc<dyn MarketDataSource>,
        sink: Arc<dyn CandleSink>,
        store: StateStore,
    ) -> Self {
        Self {
            settings,
            source,
            sink,
            store,
            run_flag: RunFlag::new(),
        }
    }

    /// Handle for requesting a stop from outside, e.g. a signal task.
    #[must_use]
    pub fn run_flag(&self) -> RunFlag {
        self.run_flag.clone()
    }

    /// Runs until the run flag is cleared or reconnects are exhausted.
    ///
    /// Teardown runs on both paths; the final progress is always persisted
    /// and the source link is always released.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Reconnect`] when the connection could not
    /// be restored within the attempt budget.
    pub async fn run(self) -> Result<RunSummary, CollectorError> {
        let progress = self.store.load();
        let connection = Arc::new(ConnectionManager::new(
            self.source.clone(),
            self.settings.connection.clone(),
            self.run_flag.clone(),
            progress.connection_attempts,
            progress.last_connection_time,
        ));

        if let Err(e) = connection.initialize().await {
            // Left to the reconnect path, which enforces the attempt budget
            warn!(error = %e, "Initial connection failed, will retry");
        }

        let health = HealthMonitor::new(
            connection.clone(),
            self.settings.health_check_interval,
            self.run_flag.clone(),
        )
        .spawn();

        let mut poll = PollLoop::new(
            connection.clone(),
            self.sink.clone(),
            self.store.clone(),
            self.settings.poll.clone(),
            self.run_flag.clone(),
            progress,
        );
        let mut result = poll.run().await;

        info!("Shutting down collector");
        self.run_flag.stop();
        poll.persist();

        let health_report = join_health(health, self.settings.shutdown_timeout).await;
        connection.shutdown().await;

        if let Some(report) = &health_report {
            if report.exhausted && result.is_ok() {
                // The monitor ran out of attempts while the poll loop slept
                result = Err(ReconnectError::Exhausted {
                    attempts: connection.attempts(),
                });
            }
        }

        info!(
            checks = health_report.as_ref().map_or(0, |r| r.checks),
            "Collector stopped. {}",
            poll.stats().summary()
        );

        match result {
            Ok(()) => Ok(RunSummary {
                stats: poll.stats().clone(),
                progress: poll.progress().clone(),
                health: health_report,
            }),
            Err(e) => Err(CollectorError::from(e)),
        }
    }

    /// Runs with SIGTERM/SIGINT wired to the run flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed or the
    /// run ends with reconnect exhaustion.
    pub async fn run_until_signal(self) -> anyhow::Result<RunSummary> {
        let signals = spawn_signal_listener(self.run_flag())?;
        let result = self.run().await;
        signals.abort();
        Ok(result?)
    }
}

/// Waits up to `limit` for the health monitor. On timeout the task is
/// detached, not aborted; it exits on its own once its current check ends.
async fn join_health(mut handle: JoinHandle<HealthReport>, limit: Duration) -> Option<HealthReport> {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!(error = %e, "Health monitor task failed");
            None
        }
        Err(_) => {
            warn!(
                timeout_secs = limit.as_secs_f64(),
                "Health monitor did not stop in time, detaching it"
            );
            drop(handle);
            None
        }
    }
}

/// Clears `run_flag` on the first termination signal.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be registered.
#[cfg(unix)]
pub fn spawn_signal_listener(run_flag: RunFlag) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
        run_flag.stop();
    }))
}

/// Clears `run_flag` on Ctrl+C.
///
/// # Errors
///
/// Never fails on this platform; the signature matches the unix variant.
#[cfg(not(unix))]
pub fn spawn_signal_listener(run_flag: RunFlag) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
        }
        run_flag.stop();
    }))
}
