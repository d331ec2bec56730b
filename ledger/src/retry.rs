//! Transactional retry boundary.

use std::time::Duration;

use async_trait::async_trait;
use ledgerbench_common::{FailureClass, Result};
use rand::Rng;
use tracing::debug;

use crate::store::{LedgerStore, LedgerTx};

/// How often, and how patiently, a conflicting transaction is re-executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per unit of work, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_backoff: Duration,
    /// Upper bound for any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Backoff ceiling after `attempt` failed attempts.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }

    /// Backoff drawn uniformly from the upper half of the ceiling.
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let floor = ceiling / 2;
        rand::thread_rng().gen_range(floor..=ceiling)
    }

    /// Validate the policy.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry attempts must be at least 1".to_string());
        }

        if self.base_backoff > self.max_backoff {
            return Err("Base backoff cannot exceed max backoff".to_string());
        }

        Ok(())
    }
}

/// Work executed inside one transaction, re-run from scratch on retry.
#[async_trait]
pub trait TransactionalWork: Send + Sync {
    /// Value produced by a committed attempt.
    type Output: Send;

    /// Run the work against an open transaction.
    async fn run(&self, tx: &mut dyn LedgerTx) -> Result<Self::Output>;
}

/// Output of a committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    /// What the work produced.
    pub output: T,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// Run `work` in a transaction, re-executing it on transient conflicts.
///
/// Any other error, or a conflict on the last permitted attempt, is
/// returned as-is.
pub async fn execute_tx<W>(
    store: &dyn LedgerStore,
    policy: &RetryPolicy,
    work: &W,
) -> Result<Committed<W::Output>>
where
    W: TransactionalWork + ?Sized,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match attempt(store, work).await {
            Ok(output) => return Ok(Committed { output, attempts }),
            Err(err)
                if err.failure_class() == FailureClass::TransientConflict
                    && attempts < policy.max_attempts =>
            {
                debug!(
                    attempt = attempts,
                    error = %err,
                    "Transaction conflict, retrying"
                );
                let delay = policy.jittered_backoff(attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn attempt<W>(store: &dyn LedgerStore, work: &W) -> Result<W::Output>
where
    W: TransactionalWork + ?Sized,
{
    let mut tx = store.begin().await?;

    match work.run(tx.as_mut()).await {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                debug!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}
