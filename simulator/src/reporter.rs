//! Periodic commit-rate reporting.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::metrics::SharedMetrics;

/// Logs the commit rate once per interval.
pub struct RateReporter {
    metrics: SharedMetrics,
    interval: Duration,
}

impl RateReporter {
    /// Create a new reporter.
    pub fn new(metrics: SharedMetrics, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    /// Report until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => { self.report(); }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Log and reset the current window.
    pub fn report(&self) -> u64 {
        let rate = per_second(self.metrics.take_window(), self.interval);
        info!("{} postings/sec ({} total)", rate, self.metrics.committed());
        rate
    }
}

/// Scale `count` events over `interval` to a per-second rate.
pub fn per_second(count: u64, interval: Duration) -> u64 {
    let millis = interval.as_millis();
    if millis == 0 {
        return count;
    }

    (u128::from(count) * 1000 / millis) as u64
}
