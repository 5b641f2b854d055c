//! Counters for a running collector.

use chrono::{DateTime, Utc};

/// Outcome of a single poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pairs fetched and accepted by the sink
    pub sent: u32,
    /// Pairs with no data from the source
    pub fetch_failures: u32,
    /// Pairs the sink did not accept
    pub send_failures: u32,
    /// The body was skipped because the link could not be restored
    pub skipped: bool,
    /// Shutdown or link loss cut the matrix short
    pub interrupted: bool,
}

/// Totals since start.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    pub cycles: u64,
    pub batches_sent: u64,
    pub fetch_failures: u64,
    pub send_failures: u64,
    pub skipped_cycles: u64,
    pub last_send_time: Option<DateTime<Utc>>,
}

impl CollectorStats {
    /// Folds a finished cycle into the totals.
    pub fn record_cycle(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.batches_sent += u64::from(report.sent);
        self.fetch_failures += u64::from(report.fetch_failures);
        self.send_failures += u64::from(report.send_failures);
        if report.skipped {
            self.skipped_cycles += 1;
        }
    }

    pub fn batch_sent(&mut self, at: DateTime<Utc>) {
        self.last_send_time = Some(at);
    }

    /// Formats a one-line summary for logging.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Cycles: {}, Sent: {}, Fetch failures: {}, Send failures: {}, Skipped cycles: {}",
            self.cycles,
            self.batches_sent,
            self.fetch_failures,
            self.send_failures,
            self.skipped_cycles
        )
    }
}
