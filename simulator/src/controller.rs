//! Worker pool supervision.

use std::sync::Arc;
use std::time::Duration;

use ledgerbench_common::LedgerError;
use ledgerbench_ledger::LedgerEngine;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::generator::RequestGenerator;
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::reporter::RateReporter;
use crate::worker::Worker;

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Number of workers.
    pub concurrency: usize,
    /// Base seed; worker `i` is seeded with `seed + i`.
    pub seed: Option<u64>,
    /// Log every request.
    pub verbose: bool,
    /// Stop after this long.
    pub duration: Option<Duration>,
    /// Rate report interval.
    pub report_interval: Duration,
    /// Stop on Ctrl+C.
    pub handle_interrupt: bool,
}

impl From<&BenchConfig> for SupervisorSettings {
    fn from(config: &BenchConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            seed: config.seed,
            verbose: config.verbose,
            duration: config.duration,
            report_interval: config.report_interval,
            handle_interrupt: true,
        }
    }
}

/// Why the run ended.
#[derive(Debug)]
enum StopReason {
    DurationElapsed,
    Interrupted,
    WorkerExited(Option<Result<Result<(), LedgerError>, JoinError>>),
}

/// Runs the worker pool and the rate reporter.
pub struct Supervisor {
    engine: Arc<LedgerEngine>,
    generator: Arc<RequestGenerator>,
    metrics: SharedMetrics,
    settings: SupervisorSettings,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new(
        engine: Arc<LedgerEngine>,
        generator: Arc<RequestGenerator>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            engine,
            generator,
            metrics: Arc::new(Metrics::new()),
            settings,
        }
    }

    /// Shared counters.
    pub fn metrics(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    fn worker_rng(&self, id: usize) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Run until the duration elapses, Ctrl+C, or a worker fails.
    ///
    /// Every task is joined before returning. The first fatal worker error
    /// wins over the counters.
    pub async fn run(&self) -> Result<MetricsSnapshot, LedgerError> {
        info!(
            workers = self.settings.concurrency,
            generator = %self.generator.kind(),
            mode = %self.engine.mode(),
            store = self.engine.store().name(),
            "Starting workers"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut workers = JoinSet::new();
        for id in 0..self.settings.concurrency {
            let worker = Worker::new(
                id,
                Arc::clone(&self.engine),
                Arc::clone(&self.generator),
                self.metrics(),
                self.worker_rng(id),
                self.settings.verbose,
            );
            workers.spawn(worker.run(shutdown_rx.clone()));
        }

        let reporter = RateReporter::new(self.metrics(), self.settings.report_interval);
        let reporter = tokio::spawn(reporter.run(shutdown_rx));

        let deadline = async {
            match self.settings.duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let interrupt = async {
            if !self.settings.handle_interrupt {
                return std::future::pending().await;
            }
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        let reason = tokio::select! {
            _ = deadline => StopReason::DurationElapsed,
            _ = interrupt => StopReason::Interrupted,
            joined = workers.join_next() => StopReason::WorkerExited(joined),
        };

        let mut fatal = None;
        match reason {
            StopReason::DurationElapsed => info!("Run duration elapsed"),
            StopReason::Interrupted => info!("Interrupted, stopping workers"),
            StopReason::WorkerExited(joined) => {
                if let Some(joined) = joined {
                    record_exit(&mut fatal, joined);
                }
            }
        }

        // Receivers may already be gone if every task has exited.
        let _ = shutdown_tx.send(true);

        while let Some(joined) = workers.join_next().await {
            record_exit(&mut fatal, joined);
        }
        if let Err(e) = reporter.await {
            warn!(error = %e, "Rate reporter task failed");
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(self.metrics.snapshot()),
        }
    }
}

fn record_exit(fatal: &mut Option<LedgerError>, joined: Result<Result<(), LedgerError>, JoinError>) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(e) => LedgerError::InternalError(format!("worker task failed: {}", e)),
    };

    if fatal.is_none() {
        *fatal = Some(err);
    }
}
