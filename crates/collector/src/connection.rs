//! Connection lifecycle for the market data source.
//!
//! # State machine
//!
//! ```text
//! Disconnected --initialize ok--> Connected
//! Connected --probe/fetch fails--> Reconnecting
//! Reconnecting --reconnect ok--> Connected
//! Reconnecting --attempts exhausted--> Failed (terminal)
//! any --shutdown--> Disconnected
//! ```
//!
//! The poll loop and the health monitor share one `ConnectionManager`.
//! Reads of the state and attempt counter are lock-free; every reconnect
//! sequence runs inside a single async mutex so two callers never reconnect
//! at the same time. A caller that queued behind a sequence which finished
//! while it waited adopts that sequence's outcome instead of running its own.

use crate::error::{ConnectionError, ReconnectError};
use crate::run_flag::RunFlag;
use candle_relay_core::MarketDataSource;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Link state as seen by the poll loop and health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Failed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Reconnecting,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reconnect policy.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before the state becomes `Failed`
    pub max_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

pub struct ConnectionManager {
    source: Arc<dyn MarketDataSource>,
    settings: ConnectionSettings,
    run_flag: RunFlag,
    state: AtomicU8,
    attempts: AtomicU32,
    last_connection: RwLock<Option<DateTime<Utc>>>,
    /// Serializes initialize/reconnect
    reconnect_lock: Mutex<()>,
    /// Bumped at the end of every reconnect sequence
    epoch: AtomicU64,
    released: AtomicBool,
}

impl ConnectionManager {
    /// Creates a manager in the `Disconnected` state.
    ///
    /// `attempts` and `last_connection` seed the counters from a persisted
    /// snapshot so a crash loop keeps counting towards the limit. The seed is
    /// capped at the attempt budget.
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        settings: ConnectionSettings,
        run_flag: RunFlag,
        attempts: u32,
        last_connection: Option<DateTime<Utc>>,
    ) -> Self {
        let attempts = attempts.min(settings.max_attempts);
        Self {
            source,
            settings,
            run_flag,
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            attempts: AtomicU32::new(attempts),
            last_connection: RwLock::new(last_connection),
            reconnect_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// The source this manager owns the link to.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn MarketDataSource> {
        &self.source
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts
    }

    #[must_use]
    pub fn last_connection_time(&self) -> Option<DateTime<Utc>> {
        *self.last_connection.read()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Establishes the link.
    ///
    /// On success the attempt counter resets to zero and the connection time
    /// is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to initialize or the manager has
    /// already been shut down.
    pub async fn initialize(&self) -> Result<(), ConnectionError> {
        let _guard = self.reconnect_lock.lock().await;
        self.initialize_locked().await
    }

    /// Must be called with `reconnect_lock` held.
    async fn initialize_locked(&self) -> Result<(), ConnectionError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(ConnectionError::ShutDown);
        }

        match self.source.initialize().await {
            Ok(()) => {
                let now = Utc::now();
                self.attempts.store(0, Ordering::SeqCst);
                *self.last_connection.write() = Some(now);
                self.set_state(ConnectionState::Connected);
                info!(connected_at = %now, "Market data source initialized");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Market data source initialization failed");
                Err(ConnectionError::Initialize(e.to_string()))
            }
        }
    }

    /// Liveness check against the source. Never mutates the counters.
    pub async fn probe(&self) -> bool {
        match self.source.probe().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    /// Makes sure the link is usable, reconnecting if it is not.
    ///
    /// This is the shared entry point for the poll loop and the health
    /// monitor: a stale or non-connected state always leads to `reconnect`.
    ///
    /// # Errors
    ///
    /// Returns the reconnect failure when the link could not be restored.
    pub async fn ensure_connected(&self) -> Result<(), ReconnectError> {
        let seen = self.epoch.load(Ordering::SeqCst);

        if self.state() == ConnectionState::Connected {
            if self.probe().await {
                return Ok(());
            }
            warn!("Liveness probe failed, link considered lost");
        }

        self.reconnect_after(seen).await
    }

    /// Tears the link down, waits the backoff delay, then initializes again.
    ///
    /// # Errors
    ///
    /// Returns [`ReconnectError::Exhausted`] once the attempt budget is
    /// spent; the state is then `Failed` and stays there.
    pub async fn reconnect(&self) -> Result<(), ReconnectError> {
        let seen = self.epoch.load(Ordering::SeqCst);
        self.reconnect_after(seen).await
    }

    async fn reconnect_after(&self, seen_epoch: u64) -> Result<(), ReconnectError> {
        let _guard = self.reconnect_lock.lock().await;
        let max_attempts = self.settings.max_attempts;

        if self.epoch.load(Ordering::SeqCst) != seen_epoch {
            // Another caller ran a full sequence while we waited for the lock
            debug!(state = %self.state(), "Adopting outcome of concurrent reconnect");
            return match self.state() {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Failed => Err(ReconnectError::Exhausted {
                    attempts: self.attempts(),
                }),
                _ if self.released.load(Ordering::SeqCst) => Err(ReconnectError::Cancelled),
                _ => Err(ReconnectError::Failed {
                    attempt: self.attempts(),
                    max_attempts,
                    reason: "concurrent reconnect attempt failed".to_string(),
                }),
            };
        }

        if self.state() == ConnectionState::Failed {
            return Err(ReconnectError::Exhausted {
                attempts: self.attempts(),
            });
        }
        if self.released.load(Ordering::SeqCst) || !self.run_flag.is_running() {
            return Err(ReconnectError::Cancelled);
        }

        let attempt = match self.attempts.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |a| {
            Some(a.saturating_add(1))
        }) {
            Ok(prev) | Err(prev) => prev.saturating_add(1),
        };
        self.set_state(ConnectionState::Reconnecting);
        warn!(
            attempt,
            max_attempts,
            delay_secs = self.settings.reconnect_delay.as_secs_f64(),
            "Reconnecting to market data source"
        );

        let result = self.run_attempt().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(attempt, "Reconnected to market data source");
                Ok(())
            }
            Err(AttemptError::Cancelled) => {
                info!(attempt, "Reconnect abandoned, shutdown requested");
                Err(ReconnectError::Cancelled)
            }
            Err(AttemptError::Connection(e)) if attempt >= max_attempts => {
                self.set_state(ConnectionState::Failed);
                error!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Reconnect attempts exhausted, connection failed"
                );
                Err(ReconnectError::Exhausted { attempts: attempt })
            }
            Err(AttemptError::Connection(e)) => {
                warn!(attempt, max_attempts, error = %e, "Reconnect attempt failed");
                Err(ReconnectError::Failed {
                    attempt,
                    max_attempts,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run_attempt(&self) -> Result<(), AttemptError> {
        self.source.shutdown().await;

        if !self.run_flag.sleep(self.settings.reconnect_delay).await {
            return Err(AttemptError::Cancelled);
        }

        match self.initialize_locked().await {
            Ok(()) => Ok(()),
            Err(ConnectionError::ShutDown) => Err(AttemptError::Cancelled),
            Err(e) => Err(AttemptError::Connection(e)),
        }
    }

    /// Releases the underlying link. Safe to call any number of times.
    ///
    /// Does not wait for an in-flight reconnect; that attempt observes the
    /// release and gives up before initializing.
    pub async fn shutdown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!("Connection already shut down");
            return;
        }
        self.source.shutdown().await;
        if self.state() != ConnectionState::Failed {
            self.set_state(ConnectionState::Disconnected);
        }
        info!("Market data source connection released");
    }
}

enum AttemptError {
    Cancelled,
    Connection(ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use candle_relay_core::{RawRate, TerminalInfo, Timeframe};
    use std::sync::atomic::AtomicUsize;

    /// Source whose initialize/probe results are scripted by flags.
    #[derive(Default)]
    struct ScriptedSource {
        init_ok: AtomicBool,
        probe_ok: AtomicBool,
        init_calls: AtomicUsize,
        shutdown_calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn healthy() -> Arc<Self> {
            let source = Self::default();
            source.init_ok.store(true, Ordering::SeqCst);
            source.probe_ok.store(true, Ordering::SeqCst);
            Arc::new(source)
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn initialize(&self) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.init_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow!("terminal not running"))
            }
        }

        async fn probe(&self) -> Result<TerminalInfo> {
            if self.probe_ok.load(Ordering::SeqCst) {
                Ok(TerminalInfo {
                    connected: true,
                    ..TerminalInfo::default()
                })
            } else {
                Err(anyhow!("no terminal info"))
            }
        }

        async fn fetch(&self, _: &str, _: Timeframe, _: usize, _: usize) -> Result<Vec<RawRate>> {
            Ok(Vec::new())
        }

        async fn shutdown(&self) {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(source: Arc<ScriptedSource>, max_attempts: u32) -> ConnectionManager {
        ConnectionManager::new(
            source,
            ConnectionSettings {
                reconnect_delay: Duration::from_millis(5),
                max_attempts,
            },
            RunFlag::new(),
            0,
            None,
        )
    }

    #[tokio::test]
    async fn test_initialize_success_connects_and_resets_counter() {
        let source = ScriptedSource::healthy();
        let manager = ConnectionManager::new(
            source,
            ConnectionSettings::default(),
            RunFlag::new(),
            3,
            None,
        );

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.initialize().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.attempts(), 0);
        assert!(manager.last_connection_time().is_some());
    }

    #[tokio::test]
    async fn test_initialize_failure_keeps_state() {
        let manager = manager(ScriptedSource::broken(), 5);

        let err = manager.initialize().await.unwrap_err();

        assert!(matches!(err, ConnectionError::Initialize(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.last_connection_time().is_none());
    }

    #[tokio::test]
    async fn test_probe_does_not_touch_counters() {
        let source = ScriptedSource::broken();
        let manager = manager(source, 5);

        assert!(!manager.probe().await);
        assert!(!manager.probe().await);
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_increments_counter_once_per_call() {
        let source = ScriptedSource::broken();
        let manager = manager(source.clone(), 5);

        for expected in 1..=3 {
            let err = manager.reconnect().await.unwrap_err();
            assert!(matches!(err, ReconnectError::Failed { attempt, .. } if attempt == expected));
            assert_eq!(manager.attempts(), expected);
            assert_eq!(manager.state(), ConnectionState::Reconnecting);
        }
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 3);
        // Each attempt tears the link down first
        assert_eq!(source.shutdown_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_successful_reconnect_resets_counter() {
        let source = ScriptedSource::broken();
        let manager = manager(source.clone(), 5);

        manager.reconnect().await.unwrap_err();
        manager.reconnect().await.unwrap_err();
        assert_eq!(manager.attempts(), 2);

        source.init_ok.store(true, Ordering::SeqCst);
        manager.reconnect().await.unwrap();

        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal() {
        let source = ScriptedSource::broken();
        let manager = manager(source.clone(), 3);

        manager.reconnect().await.unwrap_err();
        manager.reconnect().await.unwrap_err();
        let err = manager.reconnect().await.unwrap_err();

        assert!(matches!(err, ReconnectError::Exhausted { attempts: 3 }));
        assert_eq!(manager.state(), ConnectionState::Failed);

        // No further attempts reach the source, even if it recovers
        source.init_ok.store(true, Ordering::SeqCst);
        let err = manager.reconnect().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_oversized_persisted_counter_is_capped() {
        let source = ScriptedSource::broken();
        let manager = ConnectionManager::new(
            source.clone(),
            ConnectionSettings {
                reconnect_delay: Duration::from_millis(1),
                max_attempts: 5,
            },
            RunFlag::new(),
            u32::MAX,
            None,
        );

        assert_eq!(manager.attempts(), 5);
        let err = manager.reconnect().await.unwrap_err();

        assert!(matches!(err, ReconnectError::Exhausted { attempts: 6 }));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_connected_skips_reconnect_when_probe_passes() {
        let source = ScriptedSource::healthy();
        let manager = manager(source.clone(), 5);
        manager.initialize().await.unwrap();

        manager.ensure_connected().await.unwrap();

        assert_eq!(source.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.shutdown_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ensure_connected_reconnects_when_probe_fails() {
        let source = ScriptedSource::healthy();
        let manager = manager(source.clone(), 5);
        manager.initialize().await.unwrap();

        source.probe_ok.store(false, Ordering::SeqCst);
        manager.ensure_connected().await.unwrap();

        assert_eq!(source.init_calls.load(Ordering::SeqCst), 2);
        assert_eq!(source.shutdown_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_ensure_connected_reconnects_from_disconnected() {
        let source = ScriptedSource::healthy();
        let manager = manager(source.clone(), 5);

        manager.ensure_connected().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_sequence() {
        let source = ScriptedSource::broken();
        let manager = Arc::new(ConnectionManager::new(
            source.clone(),
            ConnectionSettings {
                reconnect_delay: Duration::from_millis(50),
                max_attempts: 5,
            },
            RunFlag::new(),
            0,
            None,
        ));

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_connected().await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_connected().await }
        });

        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert_eq!(manager.attempts(), 1);
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let source = ScriptedSource::healthy();
        let manager = manager(source.clone(), 5);
        manager.initialize().await.unwrap();

        manager.shutdown().await;
        manager.shutdown().await;

        assert_eq!(source.shutdown_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_no_reconnect_after_shutdown() {
        let source = ScriptedSource::healthy();
        let manager = manager(source.clone(), 5);
        manager.shutdown().await;

        let err = manager.reconnect().await.unwrap_err();

        assert!(matches!(err, ReconnectError::Cancelled));
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            manager.initialize().await.unwrap_err(),
            ConnectionError::ShutDown
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_backoff() {
        let source = ScriptedSource::healthy();
        let run_flag = RunFlag::new();
        let manager = ConnectionManager::new(
            source.clone(),
            ConnectionSettings {
                reconnect_delay: Duration::from_secs(30),
                max_attempts: 5,
            },
            run_flag.clone(),
            0,
            None,
        );

        let stopper = run_flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.stop();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), manager.reconnect())
            .await
            .expect("backoff should be cut short")
            .unwrap_err();

        assert!(matches!(err, ReconnectError::Cancelled));
        assert_eq!(source.init_calls.load(Ordering::SeqCst), 0);
    }
}
