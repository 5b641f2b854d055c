//! Background liveness checks.
//!
//! Runs beside the poll loop and calls the same
//! [`ConnectionManager::ensure_connected`] on a fixed cadence, so a dead
//! link is noticed even while the poll loop is sleeping between cycles.

use crate::connection::ConnectionManager;
use crate::run_flag::RunFlag;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What the monitor did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checks: u64,
    pub failed_checks: u64,
    /// Set when the monitor stopped the collector because reconnects ran out
    pub exhausted: bool,
}

pub struct HealthMonitor {
    connection: Arc<ConnectionManager>,
    interval: Duration,
    run_flag: RunFlag,
}

impl HealthMonitor {
    pub fn new(connection: Arc<ConnectionManager>, interval: Duration, run_flag: RunFlag) -> Self {
        Self {
            connection,
            interval,
            run_flag,
        }
    }

    /// Runs the monitor on its own task.
    pub fn spawn(self) -> JoinHandle<HealthReport> {
        tokio::spawn(self.run())
    }

    /// Checks the link every interval until the run flag clears.
    ///
    /// Reconnect exhaustion is fatal for the whole collector: the monitor
    /// clears the run flag and exits.
    pub async fn run(self) -> HealthReport {
        let mut report = HealthReport::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; startup already initialized
        ticker.tick().await;

        info!(
            interval_secs = self.interval.as_secs_f64(),
            "Health monitor started"
        );

        while self.run_flag.is_running() {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.run_flag.stopped() => break,
            }
            if !self.run_flag.is_running() {
                break;
            }

            report.checks += 1;
            match self.connection.ensure_connected().await {
                Ok(()) => debug!(state = %self.connection.state(), "Health check passed"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Health monitor giving up, stopping collector");
                    report.failed_checks += 1;
                    report.exhausted = true;
                    self.run_flag.stop();
                    break;
                }
                Err(e) => {
                    report.failed_checks += 1;
                    warn!(
                        error = %e,
                        attempts = self.connection.attempts(),
                        max_attempts = self.connection.max_attempts(),
                        "Health check failed"
                    );
                }
            }
        }

        info!(
            checks = report.checks,
            failed_checks = report.failed_checks,
            "Health monitor stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionSettings, ConnectionState};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use candle_relay_core::{MarketDataSource, RawRate, TerminalInfo, Timeframe};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlakySource {
        alive: AtomicBool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for FlakySource {
        async fn initialize(&self) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow!("terminal down"))
            }
        }

        async fn probe(&self) -> Result<TerminalInfo> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.alive.load(Ordering::SeqCst) {
                Ok(TerminalInfo::default())
            } else {
                Err(anyhow!("terminal down"))
            }
        }

        async fn fetch(&self, _: &str, _: Timeframe, _: usize, _: usize) -> Result<Vec<RawRate>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) {}
    }

    fn setup(alive: bool, max_attempts: u32) -> (Arc<FlakySource>, Arc<ConnectionManager>, RunFlag) {
        let source = Arc::new(FlakySource {
            alive: AtomicBool::new(alive),
            probes: AtomicUsize::new(0),
        });
        let run_flag = RunFlag::new();
        let connection = Arc::new(ConnectionManager::new(
            source.clone(),
            ConnectionSettings {
                reconnect_delay: Duration::from_millis(1),
                max_attempts,
            },
            run_flag.clone(),
            0,
            None,
        ));
        (source, connection, run_flag)
    }

    #[tokio::test]
    async fn test_monitor_probes_until_stopped() {
        let (source, connection, run_flag) = setup(true, 5);
        connection.initialize().await.unwrap();

        let handle = HealthMonitor::new(connection, Duration::from_millis(10), run_flag.clone()).spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        run_flag.stop();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(report.checks >= 2);
        assert_eq!(report.failed_checks, 0);
        assert!(source.probes.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_monitor_reconnects_lost_link() {
        let (source, connection, run_flag) = setup(false, 5);

        let handle =
            HealthMonitor::new(connection.clone(), Duration::from_millis(10), run_flag.clone()).spawn();
        tokio::time::sleep(Duration::from_millis(25)).await;
        source.alive.store(true, Ordering::SeqCst);

        tokio::time::timeout(Duration::from_secs(2), async {
            while connection.state() != ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        run_flag.stop();
        handle.await.unwrap();
        assert_eq!(connection.attempts(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_stops_collector() {
        let (_source, connection, run_flag) = setup(false, 2);

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            HealthMonitor::new(connection.clone(), Duration::from_millis(5), run_flag.clone()).run(),
        )
        .await
        .unwrap();

        assert!(report.exhausted);
        assert!(!run_flag.is_running());
        assert_eq!(connection.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_stop_wakes_monitor_between_ticks() {
        let (_source, connection, run_flag) = setup(true, 5);

        let handle = HealthMonitor::new(connection, Duration::from_secs(3600), run_flag.clone()).spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        run_flag.stop();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.checks, 0);
    }
}
