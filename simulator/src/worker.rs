//! A single workload worker.

use std::sync::Arc;

use ledgerbench_common::{FailureClass, LedgerError};
use ledgerbench_ledger::LedgerEngine;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::generator::RequestGenerator;
use crate::metrics::SharedMetrics;

/// What happened to one generated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both legs committed.
    Committed { attempts: u32 },
    /// The store rejected the posting on a uniqueness constraint.
    IntegrityViolation,
    /// Conflicts outlasted the retry policy.
    ConflictAbandoned,
    /// The generator picked the same account twice.
    SkippedSelfTransfer,
}

/// Generates and submits postings until told to stop.
pub struct Worker {
    id: usize,
    engine: Arc<LedgerEngine>,
    generator: Arc<RequestGenerator>,
    metrics: SharedMetrics,
    rng: StdRng,
    verbose: bool,
}

impl Worker {
    /// Create a new worker.
    pub fn new(
        id: usize,
        engine: Arc<LedgerEngine>,
        generator: Arc<RequestGenerator>,
        metrics: SharedMetrics,
        rng: StdRng,
        verbose: bool,
    ) -> Self {
        Self {
            id,
            engine,
            generator,
            metrics,
            rng,
            verbose,
        }
    }

    /// Generate one request and carry it to a terminal outcome.
    ///
    /// Only a fatal store error is returned as `Err`.
    pub async fn step(&mut self) -> Result<Outcome, LedgerError> {
        let request = self
            .generator
            .generate(&mut self.rng, self.metrics.committed());

        if request.is_self_transfer() {
            self.metrics.self_transfer_skipped();
            return Ok(Outcome::SkippedSelfTransfer);
        }

        if self.verbose {
            info!(worker = self.id, %request, "Running posting");
        }

        self.metrics.request_attempted();
        let posting = self.engine.prepare(request, &mut self.rng)?;

        match self.engine.submit(&posting).await {
            Ok(receipt) => {
                self.metrics.posting_committed(receipt.attempts);
                if self.verbose {
                    info!(
                        worker = self.id,
                        group = %posting.request().group,
                        attempts = receipt.attempts,
                        "Posting succeeded"
                    );
                }
                Ok(Outcome::Committed {
                    attempts: receipt.attempts,
                })
            }
            Err(err) => self.classify(err),
        }
    }

    fn classify(&self, err: LedgerError) -> Result<Outcome, LedgerError> {
        let class = err.failure_class();
        if !class.is_recoverable() {
            error!(worker = self.id, code = err.error_code(), error = %err, "Fatal store error");
            return Err(err);
        }

        if class == FailureClass::IntegrityViolation {
            warn!(worker = self.id, error = %err, "Integrity violation");
            self.metrics.integrity_violation();
            return Ok(Outcome::IntegrityViolation);
        }

        if self.verbose {
            info!(worker = self.id, error = %err, "Conflict persisted, giving up");
        } else {
            debug!(worker = self.id, error = %err, "Conflict persisted, giving up");
        }
        self.metrics.conflict_abandoned();
        Ok(Outcome::ConflictAbandoned)
    }

    /// Loop until `shutdown` flips or a fatal error occurs.
    ///
    /// The request in flight when shutdown is raised runs to completion.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<(), LedgerError> {
        debug!(worker = self.id, "Worker started");

        while !*shutdown.borrow() {
            self.step().await?;
            // Store calls may complete without suspending.
            tokio::task::yield_now().await;
        }

        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }
}
