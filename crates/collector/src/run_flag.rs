//! Shared running flag.
//!
//! Signal handlers only call [`RunFlag::stop`]. Loops poll
//! [`RunFlag::is_running`] between steps and use [`RunFlag::sleep`] so a stop
//! wakes them immediately instead of after the full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RunFlag {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    running: AtomicBool,
    tx: watch::Sender<bool>,
}

impl RunFlag {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                tx,
            }),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Clears the flag. Idempotent and safe to call from any task.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.tx.send_replace(false);
    }

    /// Resolves once the flag has been cleared.
    pub async fn stopped(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on stop
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Sleeps for `duration` unless stopped first.
    ///
    /// Returns true if the full duration elapsed while still running.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => self.is_running(),
            () = self.stopped() => false,
        }
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_new_flag_is_running() {
        assert!(RunFlag::new().is_running());
    }

    #[test]
    fn test_stop_is_shared_and_idempotent() {
        let flag = RunFlag::new();
        let other = flag.clone();

        other.stop();
        other.stop();

        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn test_sleep_completes_when_running() {
        let flag = RunFlag::new();
        assert!(flag.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_stop() {
        let flag = RunFlag::new();
        let stopper = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.stop();
        });

        let start = Instant::now();
        let completed = flag.sleep(Duration::from_secs(30)).await;

        assert!(!completed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_after_stop_returns_immediately() {
        let flag = RunFlag::new();
        flag.stop();
        assert!(!flag.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_stopped_resolves_for_late_subscribers() {
        let flag = RunFlag::new();
        flag.stop();

        tokio::time::timeout(Duration::from_secs(1), flag.stopped())
            .await
            .expect("stopped() should resolve once the flag is cleared");
    }
}
