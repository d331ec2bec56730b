//! Posting engine: the two-leg atomic write and its retry boundary.

use std::sync::Arc;

use async_trait::async_trait;
use ledgerbench_common::{AccountId, PostingRequest, Result};
use rand::Rng;
use tracing::{debug, instrument};

use crate::audit::{audit, AuditReport};
use crate::balance::{last_balance, BalanceMode, BalanceSnapshot, PriorBalances};
use crate::journal::PostingLegs;
use crate::retry::{execute_tx, RetryPolicy, TransactionalWork};
use crate::store::{LedgerStore, LedgerTx};

/// A validated request with its prior-balance source fixed.
#[derive(Debug, Clone)]
pub struct Posting {
    request: PostingRequest,
    priors: PriorBalances,
}

impl Posting {
    /// Create a posting.
    pub fn new(request: PostingRequest, priors: PriorBalances) -> Self {
        Self { request, priors }
    }

    /// The underlying request.
    pub fn request(&self) -> &PostingRequest {
        &self.request
    }

    /// Where the priors come from.
    pub fn priors(&self) -> PriorBalances {
        self.priors
    }
}

#[async_trait]
impl TransactionalWork for Posting {
    type Output = PostingLegs;

    async fn run(&self, tx: &mut dyn LedgerTx) -> Result<PostingLegs> {
        let (prior_a, prior_b) = self.priors.resolve(tx, &self.request).await?;
        let legs = PostingLegs::build(&self.request, prior_a, prior_b)?;
        tx.insert_legs(&self.request, &legs).await?;
        Ok(legs)
    }
}

/// Outcome of a committed posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingReceipt {
    /// The legs as written.
    pub legs: PostingLegs,
    /// Transaction attempts, including the committed one.
    pub attempts: u32,
}

/// The ledger engine writes postings against a store.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    mode: BalanceMode,
    retry: RetryPolicy,
}

impl LedgerEngine {
    /// Create a new ledger engine.
    pub fn new(store: Arc<dyn LedgerStore>, mode: BalanceMode, retry: RetryPolicy) -> Self {
        Self { store, mode, retry }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Balance mode postings are prepared with.
    pub fn mode(&self) -> BalanceMode {
        self.mode
    }

    /// Validate `request` and fix its priors.
    pub fn prepare<R: Rng + ?Sized>(&self, request: PostingRequest, rng: &mut R) -> Result<Posting> {
        request.validate()?;
        let priors = PriorBalances::for_mode(self.mode, &request, rng);
        Ok(Posting::new(request, priors))
    }

    /// Commit `posting`, retrying transient conflicts per the retry policy.
    #[instrument(level = "debug", skip_all, fields(group = %posting.request().group))]
    pub async fn submit(&self, posting: &Posting) -> Result<PostingReceipt> {
        let committed = execute_tx(self.store.as_ref(), &self.retry, posting).await?;

        debug!(
            attempts = committed.attempts,
            credit_causality = committed.output.credit.causality_id,
            debit_causality = committed.output.debit.causality_id,
            "Posting committed"
        );

        Ok(PostingReceipt {
            legs: committed.output,
            attempts: committed.attempts,
        })
    }

    /// Prepare and submit in one step.
    pub async fn post<R: Rng + Send + ?Sized>(
        &self,
        request: &PostingRequest,
        rng: &mut R,
    ) -> Result<PostingReceipt> {
        let posting = self.prepare(request.clone(), rng)?;
        self.submit(&posting).await
    }

    /// Current balance of `account`.
    pub async fn balance(&self, account: &AccountId) -> Result<BalanceSnapshot> {
        let mut tx = self.store.begin().await?;
        let snapshot = last_balance(tx.as_mut(), account).await;
        tx.rollback().await?;
        snapshot
    }

    /// Audit every committed entry.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn audit(&self) -> Result<AuditReport> {
        let entries = self.store.entries().await?;
        Ok(audit(&entries, self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbench_common::{FailureClass, LedgerError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio_test::assert_ok;

    use crate::memory::{InjectedFault, MemoryStore};

    fn engine(store: &MemoryStore, mode: BalanceMode, retry: RetryPolicy) -> LedgerEngine {
        LedgerEngine::new(Arc::new(store.clone()), mode, retry)
    }

    #[tokio::test]
    async fn test_round_trip_transfer_nets_to_zero() {
        let store = MemoryStore::new();
        let engine = engine(&store, BalanceMode::Running, RetryPolicy::default());
        let mut rng = StdRng::seed_from_u64(1);

        assert_ok!(
            engine
                .post(&PostingRequest::new(1, "a", "b", 5, "USD"), &mut rng)
                .await
        );
        assert_eq!(engine.balance(&"a".into()).await.unwrap(), BalanceSnapshot::new(1, 5));
        assert_eq!(engine.balance(&"b".into()).await.unwrap(), BalanceSnapshot::new(1, -5));

        assert_ok!(
            engine
                .post(&PostingRequest::new(2, "b", "a", 5, "USD"), &mut rng)
                .await
        );
        assert_eq!(engine.balance(&"a".into()).await.unwrap(), BalanceSnapshot::new(2, 0));
        assert_eq!(engine.balance(&"b".into()).await.unwrap(), BalanceSnapshot::new(2, 0));

        let report = engine.audit().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.entries, 4);
    }

    #[tokio::test]
    async fn test_unknown_account_has_zero_balance() {
        let store = MemoryStore::new();
        let engine = engine(&store, BalanceMode::Running, RetryPolicy::default());
        assert_eq!(
            engine.balance(&"nobody".into()).await.unwrap(),
            BalanceSnapshot::ZERO
        );
    }

    #[tokio::test]
    async fn test_disabled_mode_ignores_history() {
        let store = MemoryStore::new();
        let running = engine(&store, BalanceMode::Running, RetryPolicy::default());
        let disabled = engine(&store, BalanceMode::Disabled, RetryPolicy::default());
        let mut rng = StdRng::seed_from_u64(2);

        for group in 1..=3 {
            running
                .post(&PostingRequest::new(group, "a", "b", 4, "USD"), &mut rng)
                .await
                .unwrap();
        }

        let k = 9;
        let posting = disabled
            .prepare(PostingRequest::new(10, "a", "b", k, "USD"), &mut rng)
            .unwrap();
        let PriorBalances::Synthesized { a, b } = posting.priors() else {
            panic!("expected synthesized priors");
        };
        assert_eq!(a.balance, -k);
        assert_eq!(b.balance, k);

        let receipt = disabled.submit(&posting).await.unwrap();
        assert_eq!(receipt.legs.credit.amount, k);
        assert_eq!(receipt.legs.credit.balance, 0);
        assert_eq!(receipt.legs.debit.amount, -k);
        assert_eq!(receipt.legs.debit.balance, 0);
        assert_eq!(receipt.legs.credit.causality_id, a.causality_id + 1);
    }

    #[tokio::test]
    async fn test_retry_writes_same_rows() {
        let store = MemoryStore::new();
        store.inject_fault(InjectedFault::Conflict);
        let engine = engine(&store, BalanceMode::Disabled, RetryPolicy::immediate(3));
        let mut rng = StdRng::seed_from_u64(3);

        let posting = engine
            .prepare(PostingRequest::new(1, "a", "b", 5, "USD"), &mut rng)
            .unwrap();
        let PriorBalances::Synthesized { a, .. } = posting.priors() else {
            panic!("expected synthesized priors");
        };

        let receipt = engine.submit(&posting).await.unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(receipt.legs.credit.causality_id, a.causality_id + 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_no_partial_posting() {
        let store = MemoryStore::new();
        let engine = engine(&store, BalanceMode::Running, RetryPolicy::immediate(2));
        let mut rng = StdRng::seed_from_u64(4);

        store.inject_fault(InjectedFault::Fatal);
        let err = engine
            .post(&PostingRequest::new(1, "a", "b", 5, "USD"), &mut rng)
            .await
            .unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::Fatal);

        store.inject_fault(InjectedFault::Conflict);
        store.inject_fault(InjectedFault::Conflict);
        let err = engine
            .post(&PostingRequest::new(2, "a", "b", 5, "USD"), &mut rng)
            .await
            .unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::TransientConflict);

        assert!(store.is_empty());
        assert!(engine.audit().await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_self_transfer_never_submitted() {
        let store = MemoryStore::new();
        let engine = engine(&store, BalanceMode::Running, RetryPolicy::default());
        let mut rng = StdRng::seed_from_u64(5);

        let err = engine
            .post(&PostingRequest::new(1, "a", "a", 5, "USD"), &mut rng)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRequest(_)));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_hot_account_postings() {
        let store = MemoryStore::new();
        let engine = Arc::new(engine(&store, BalanceMode::Running, RetryPolicy::immediate(1)));
        let hot = AccountId::new("outbound_wash");

        let mut handles = Vec::new();
        for i in 0..16i64 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(i as u64);
                let req =
                    PostingRequest::new(100 + i, AccountId::numbered(i), "outbound_wash", 5, "USD");
                engine.post(&req, &mut rng).await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(receipt) => {
                    committed += 1;
                    assert!(receipt.legs.debit.causality_id >= 1);
                }
                Err(err) => assert_eq!(err.failure_class(), FailureClass::TransientConflict),
            }
        }

        assert!(committed >= 1);
        let snapshot = engine.balance(&hot).await.unwrap();
        assert_eq!(snapshot.causality_id, committed);
        assert_eq!(snapshot.balance, -5 * committed);

        let report = engine.audit().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
    }
}
