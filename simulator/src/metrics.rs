//! Workload counters shared by every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide workload counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests handed to the engine.
    pub attempted: AtomicU64,
    /// Postings committed.
    pub committed: AtomicU64,
    /// Transaction attempts beyond the first, over committed postings.
    pub retries: AtomicU64,
    /// Postings rejected by a uniqueness constraint.
    pub integrity_violations: AtomicU64,
    /// Postings that ran out of retries on conflicts.
    pub conflicts_abandoned: AtomicU64,
    /// Generated self-transfers dropped before submission.
    pub self_transfers_skipped: AtomicU64,
    /// Commits since the rate reporter last looked.
    window: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request was handed to the engine.
    pub fn request_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// A posting committed after `attempts` transaction attempts.
    pub fn posting_committed(&self, attempts: u32) {
        self.committed.fetch_add(1, Ordering::Relaxed);
        self.window.fetch_add(1, Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    /// Record an integrity violation.
    pub fn integrity_violation(&self) {
        self.integrity_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a posting abandoned on conflicts.
    pub fn conflict_abandoned(&self) {
        self.conflicts_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped self-transfer.
    pub fn self_transfer_skipped(&self) {
        self.self_transfers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Postings committed so far.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Commits since the previous call, resetting the window to zero.
    ///
    /// A commit racing with the swap lands in exactly one window.
    pub fn take_window(&self) -> u64 {
        self.window.swap(0, Ordering::Relaxed)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            integrity_violations: self.integrity_violations.load(Ordering::Relaxed),
            conflicts_abandoned: self.conflicts_abandoned.load(Ordering::Relaxed),
            self_transfers_skipped: self.self_transfers_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub attempted: u64,
    pub committed: u64,
    pub retries: u64,
    pub integrity_violations: u64,
    pub conflicts_abandoned: u64,
    pub self_transfers_skipped: u64,
}

impl MetricsSnapshot {
    /// Fraction of attempted requests that committed.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }

        self.committed as f64 / self.attempted as f64
    }

    /// Committed postings per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.committed as f64 / secs
    }
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        for _ in 0..4 {
            metrics.request_attempted();
        }
        metrics.posting_committed(1);
        metrics.posting_committed(3);
        metrics.posting_committed(1);
        metrics.integrity_violation();
        metrics.self_transfer_skipped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempted, 4);
        assert_eq!(snapshot.committed, 3);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.integrity_violations, 1);
        assert_eq!(snapshot.conflicts_abandoned, 0);
        assert_eq!(snapshot.self_transfers_skipped, 1);
        assert_eq!(snapshot.success_rate(), 0.75);
    }

    #[test]
    fn test_window_resets() {
        let metrics = Metrics::new();
        metrics.posting_committed(1);
        metrics.posting_committed(1);

        assert_eq!(metrics.take_window(), 2);
        assert_eq!(metrics.take_window(), 0);

        metrics.posting_committed(1);
        assert_eq!(metrics.take_window(), 1);
        assert_eq!(metrics.committed(), 3);
    }

    #[test]
    fn test_throughput() {
        let snapshot = MetricsSnapshot {
            committed: 500,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snapshot.throughput(Duration::from_secs(2)), 250.0);
        assert_eq!(snapshot.throughput(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_concurrent_window_counts_every_commit() {
        let metrics = Arc::new(Metrics::new());
        let mut seen = 0;

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let metrics = Arc::clone(&metrics);
                scope.spawn(move || {
                    for _ in 0..1000 {
                        metrics.posting_committed(1);
                    }
                });
            }
            for _ in 0..100 {
                seen += metrics.take_window();
            }
        });

        seen += metrics.take_window();
        assert_eq!(seen, 4000);
    }
}
