//! Store seam between the posting protocol and a concrete SQL backend.

use async_trait::async_trait;
use ledgerbench_common::{AccountId, PostingRequest, Result};

use crate::balance::BalanceSnapshot;
use crate::journal::{LedgerEntry, PostingLegs};

/// An open transactional scope.
///
/// Errors are returned unmodified; classification happens in the caller.
#[async_trait]
pub trait LedgerTx: Send {
    /// Causality ID and balance of the newest entry for `account`.
    async fn last_entry(&mut self, account: &AccountId) -> Result<Option<BalanceSnapshot>>;

    /// Insert both legs of `request` as one statement.
    async fn insert_legs(&mut self, request: &PostingRequest, legs: &PostingLegs) -> Result<()>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back the transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A transactional ledger store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    /// Open a serializable transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Create the `accounts` table and its indexes if missing.
    async fn ensure_schema(&self) -> Result<()>;

    /// Every committed entry, ordered by account and causality ID.
    async fn entries(&self) -> Result<Vec<LedgerEntry>>;
}
