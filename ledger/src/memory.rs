//! In-process ledger store.
//!
//! Enforces the same keys as the SQL schema and reports the same SQLSTATE
//! codes. Transactions are optimistic: writes are buffered until commit, and
//! commit fails with a serialization failure if any account read by the
//! transaction gained a newer entry in the meantime.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ledgerbench_common::{AccountId, LedgerError, PostingGroupId, PostingRequest, Result};
use parking_lot::Mutex;

use crate::balance::BalanceSnapshot;
use crate::journal::{LedgerEntry, PostingLegs};
use crate::store::{LedgerStore, LedgerTx};

/// Failure forced onto the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Serialization failure (`40001`).
    Conflict,
    /// Unique violation (`23505`).
    IntegrityViolation,
    /// Error without a SQLSTATE.
    Fatal,
}

impl InjectedFault {
    fn into_error(self) -> LedgerError {
        match self {
            InjectedFault::Conflict => {
                LedgerError::serialization_failure("injected: could not serialize access")
            }
            InjectedFault::IntegrityViolation => {
                LedgerError::unique_violation("injected: duplicate key value")
            }
            InjectedFault::Fatal => LedgerError::InternalError("injected: store failure".into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Entries per account keyed by causality ID.
    chains: HashMap<AccountId, BTreeMap<i64, LedgerEntry>>,
    /// Primary keys in use.
    keys: HashSet<(AccountId, PostingGroupId)>,
}

impl MemoryState {
    fn last(&self, account: &AccountId) -> Option<BalanceSnapshot> {
        self.chains
            .get(account)
            .and_then(|chain| chain.last_key_value())
            .map(|(_, entry)| BalanceSnapshot::new(entry.causality_id, entry.balance))
    }

    fn last_causality(&self, account: &AccountId) -> Option<i64> {
        self.last(account).map(|snapshot| snapshot.causality_id)
    }

    fn check_keys(&self, entry: &LedgerEntry) -> Result<()> {
        if self
            .keys
            .contains(&(entry.account_id.clone(), entry.posting_group_id))
        {
            return Err(primary_key_violation(entry));
        }

        let causality_taken = self
            .chains
            .get(&entry.account_id)
            .is_some_and(|chain| chain.contains_key(&entry.causality_id));
        if causality_taken {
            return Err(causality_violation(entry));
        }

        Ok(())
    }

    fn apply(&mut self, entry: LedgerEntry) {
        self.keys
            .insert((entry.account_id.clone(), entry.posting_group_id));
        self.chains
            .entry(entry.account_id.clone())
            .or_default()
            .insert(entry.causality_id, entry);
    }
}

fn primary_key_violation(entry: &LedgerEntry) -> LedgerError {
    LedgerError::unique_violation(format!(
        "duplicate key value violates unique constraint \"accounts_pkey\": ({}, {})",
        entry.account_id, entry.posting_group_id
    ))
}

fn causality_violation(entry: &LedgerEntry) -> LedgerError {
    LedgerError::unique_violation(format!(
        "duplicate key value violates unique constraint \"accounts_account_id_causality_id_key\": ({}, {})",
        entry.account_id, entry.causality_id
    ))
}

/// Ledger store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<VecDeque<InjectedFault>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for an upcoming commit. Faults are consumed in order.
    pub fn inject_fault(&self, fault: InjectedFault) {
        self.faults.lock().push_back(fault);
    }

    /// Faults not yet consumed.
    pub fn pending_faults(&self) -> usize {
        self.faults.lock().len()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// No committed entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed position of `account`.
    pub fn balance(&self, account: &AccountId) -> BalanceSnapshot {
        self.state.lock().last(account).unwrap_or(BalanceSnapshot::ZERO)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            faults: Arc::clone(&self.faults),
            reads: HashMap::new(),
            pending: Vec::new(),
        }))
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock();
        let mut accounts: Vec<_> = state.chains.iter().collect();
        accounts.sort_by(|a, b| a.0.cmp(b.0));

        Ok(accounts
            .into_iter()
            .flat_map(|(_, chain)| chain.values().cloned())
            .collect())
    }
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Mutex<VecDeque<InjectedFault>>>,
    /// Last causality ID observed per account at first read.
    reads: HashMap<AccountId, Option<i64>>,
    /// Buffered writes.
    pending: Vec<LedgerEntry>,
}

impl MemoryTx {
    fn validate_reads(&self, state: &MemoryState) -> Result<()> {
        for (account, observed) in &self.reads {
            if state.last_causality(account) != *observed {
                return Err(LedgerError::serialization_failure(format!(
                    "could not serialize access due to concurrent update of account {}",
                    account
                )));
            }
        }
        Ok(())
    }

    fn check_pending(&self, entry: &LedgerEntry) -> Result<()> {
        for existing in &self.pending {
            if existing.account_id != entry.account_id {
                continue;
            }
            if existing.posting_group_id == entry.posting_group_id {
                return Err(primary_key_violation(entry));
            }
            if existing.causality_id == entry.causality_id {
                return Err(causality_violation(entry));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn last_entry(&mut self, account: &AccountId) -> Result<Option<BalanceSnapshot>> {
        let committed = self.state.lock().last(account);
        self.reads
            .entry(account.clone())
            .or_insert(committed.map(|snapshot| snapshot.causality_id));

        let own = self
            .pending
            .iter()
            .filter(|entry| &entry.account_id == account)
            .max_by_key(|entry| entry.causality_id)
            .map(|entry| BalanceSnapshot::new(entry.causality_id, entry.balance));

        Ok(match (committed, own) {
            (Some(c), Some(o)) if c.causality_id > o.causality_id => Some(c),
            (_, Some(o)) => Some(o),
            (c, None) => c,
        })
    }

    async fn insert_legs(&mut self, request: &PostingRequest, legs: &PostingLegs) -> Result<()> {
        let now = Utc::now().naive_utc();
        let rows = [
            legs.credit.clone().into_entry(request, now),
            legs.debit.clone().into_entry(request, now),
        ];

        {
            let state = self.state.lock();
            self.validate_reads(&state)?;
            for row in &rows {
                state.check_keys(row)?;
                self.check_pending(row)?;
            }
        }

        let [credit, debit] = rows;
        if credit.account_id == debit.account_id {
            return Err(primary_key_violation(&debit));
        }

        self.pending.push(credit);
        self.pending.push(debit);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault.into_error());
        }

        let shared = Arc::clone(&self.state);
        let mut state = shared.lock();
        self.validate_reads(&state)?;
        for row in &self.pending {
            state.check_keys(row)?;
        }

        let MemoryTx { pending, .. } = *self;
        for row in pending {
            state.apply(row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbench_common::FailureClass;

    fn legs_for(req: &PostingRequest, cid_a: i64, cid_b: i64) -> PostingLegs {
        PostingLegs::build(
            req,
            BalanceSnapshot::new(cid_a, 0),
            BalanceSnapshot::new(cid_b, 0),
        )
        .unwrap()
    }

    async fn commit_posting(
        store: &MemoryStore,
        req: &PostingRequest,
        cid_a: i64,
        cid_b: i64,
    ) -> Result<()> {
        let mut tx = store.begin().await?;
        tx.insert_legs(req, &legs_for(req, cid_a, cid_b)).await?;
        tx.commit().await
    }

    #[tokio::test]
    async fn test_empty_account_has_no_entry() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.last_entry(&AccountId::new("a")).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_commit_publishes_both_legs() {
        let store = MemoryStore::new();
        let req = PostingRequest::new(1, "a", "b", 5, "USD");
        commit_posting(&store, &req, 0, 0).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.balance(&AccountId::new("a")), BalanceSnapshot::new(1, 5));
        assert_eq!(store.balance(&AccountId::new("b")), BalanceSnapshot::new(1, -5));
    }

    #[tokio::test]
    async fn test_primary_key_violation() {
        let store = MemoryStore::new();
        commit_posting(&store, &PostingRequest::new(1, "a", "b", 5, "USD"), 0, 0)
            .await
            .unwrap();

        let err = commit_posting(&store, &PostingRequest::new(1, "a", "c", 5, "USD"), 1, 0)
            .await
            .unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::IntegrityViolation);
        assert!(err.to_string().contains("accounts_pkey"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_causality_violation() {
        let store = MemoryStore::new();
        commit_posting(&store, &PostingRequest::new(1, "a", "b", 5, "USD"), 0, 0)
            .await
            .unwrap();

        let err = commit_posting(&store, &PostingRequest::new(2, "a", "c", 5, "USD"), 0, 0)
            .await
            .unwrap_err();
        assert_eq!(err.sqlstate().as_deref(), Some("23505"));
    }

    #[tokio::test]
    async fn test_self_transfer_collides_on_primary_key() {
        let store = MemoryStore::new();
        let req = PostingRequest::new(1, "a", "a", 5, "USD");
        let err = commit_posting(&store, &req, 0, 7).await.unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::IntegrityViolation);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stale_read_is_serialization_failure() {
        let store = MemoryStore::new();
        let account = AccountId::new("hot");

        let mut slow = store.begin().await.unwrap();
        assert_eq!(slow.last_entry(&account).await.unwrap(), None);

        commit_posting(&store, &PostingRequest::new(1, "x", "hot", 5, "USD"), 0, 0)
            .await
            .unwrap();

        let req = PostingRequest::new(2, "y", "hot", 5, "USD");
        let err = slow.insert_legs(&req, &legs_for(&req, 0, 0)).await.unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::TransientConflict);
    }

    #[tokio::test]
    async fn test_failed_commit_publishes_nothing() {
        let store = MemoryStore::new();
        store.inject_fault(InjectedFault::Fatal);

        let req = PostingRequest::new(1, "a", "b", 5, "USD");
        let err = commit_posting(&store, &req, 0, 0).await.unwrap_err();
        assert_eq!(err.failure_class(), FailureClass::Fatal);
        assert!(store.is_empty());
        assert_eq!(store.pending_faults(), 0);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let req = PostingRequest::new(1, "a", "b", 5, "USD");

        let mut tx = store.begin().await.unwrap();
        tx.insert_legs(&req, &legs_for(&req, 0, 0)).await.unwrap();
        assert_eq!(
            tx.last_entry(&AccountId::new("a")).await.unwrap(),
            Some(BalanceSnapshot::new(1, 5))
        );
        tx.rollback().await.unwrap();

        assert!(store.is_empty());
    }
}
