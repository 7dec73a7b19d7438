//! Metrics tracking for the ingestion pipeline.
//!
//! Provides atomic counters shared by the processor, the publisher and the
//! ingestion service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Counters for the ingestion pipeline.
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Logs handed to the processor.
    logs_seen: AtomicU64,

    /// Deposits stored for the first time.
    deposits_stored: AtomicU64,

    /// Withdrawals stored for the first time.
    withdrawals_stored: AtomicU64,

    /// Events already stored.
    duplicates: AtomicU64,

    /// Logs skipped because they could not be decoded.
    decode_errors: AtomicU64,

    /// Events accepted by the broker.
    published: AtomicU64,

    /// Failed publish attempts.
    publish_failures: AtomicU64,

    /// Messages the broker returned because no queue was bound.
    unroutable: AtomicU64,

    /// Backfill ranges committed.
    ranges_committed: AtomicU64,

    /// Broker reconnects.
    reconnects: AtomicU64,

    /// Ingestion cycle restarts.
    restarts: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs_seen: AtomicU64::new(0),
            deposits_stored: AtomicU64::new(0),
            withdrawals_stored: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
            ranges_committed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a log handed to the processor.
    pub fn record_log(&self) {
        self.logs_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a first-time deposit insert.
    pub fn record_deposit(&self) {
        self.deposits_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a first-time withdrawal insert.
    pub fn record_withdrawal(&self) {
        self.withdrawals_stored.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a duplicate insert.
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an undecodable log.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an accepted publish.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed publish.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message returned as unroutable.
    pub fn record_unroutable(&self) {
        self.unroutable.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a committed backfill range.
    pub fn record_range_committed(&self) {
        self.ranges_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a broker reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an ingestion cycle restart.
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of logs seen.
    #[must_use]
    pub fn logs_seen(&self) -> u64 {
        self.logs_seen.load(Ordering::Relaxed)
    }

    /// Returns the number of events published.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of failed publishes.
    #[must_use]
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of unroutable messages.
    #[must_use]
    pub fn unroutable(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }

    /// Returns the number of restarts.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Returns the time since creation.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the logs per second since start.
    #[must_use]
    pub fn logs_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.logs_seen() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            logs_seen: self.logs_seen.load(Ordering::Relaxed),
            deposits_stored: self.deposits_stored.load(Ordering::Relaxed),
            withdrawals_stored: self.withdrawals_stored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            ranges_committed: self.ranges_committed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Logs handed to the processor.
    pub logs_seen: u64,
    /// Deposits stored for the first time.
    pub deposits_stored: u64,
    /// Withdrawals stored for the first time.
    pub withdrawals_stored: u64,
    /// Events already stored.
    pub duplicates: u64,
    /// Undecodable logs.
    pub decode_errors: u64,
    /// Events accepted by the broker.
    pub published: u64,
    /// Failed publishes.
    pub publish_failures: u64,
    /// Published but returned as unroutable.
    pub unroutable: u64,
    /// Backfill ranges committed.
    pub ranges_committed: u64,
    /// Broker reconnects.
    pub reconnects: u64,
    /// Cycle restarts.
    pub restarts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(metrics.logs_seen(), 0);
    }

    #[test]
    fn test_metrics_counters() {
        let metrics = PipelineMetrics::new();

        metrics.record_log();
        metrics.record_log();
        metrics.record_deposit();
        metrics.record_withdrawal();
        metrics.record_duplicate();
        metrics.record_decode_error();
        metrics.record_published();
        metrics.record_publish_failure();
        metrics.record_unroutable();
        metrics.record_unroutable();
        metrics.record_range_committed();
        metrics.record_reconnect();
        metrics.record_restart();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.logs_seen, 2);
        assert_eq!(snapshot.deposits_stored, 1);
        assert_eq!(snapshot.withdrawals_stored, 1);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.unroutable, 2);
        assert_eq!(metrics.unroutable(), 2);
        assert_eq!(snapshot.ranges_committed, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.restarts, 1);
    }

    #[test]
    fn test_metrics_logs_per_second() {
        let metrics = PipelineMetrics::new();
        metrics.record_log();
        assert!(metrics.logs_per_second() >= 0.0);
    }
}
