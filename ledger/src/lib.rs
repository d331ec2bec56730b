//! ledgerbench Ledger Engine
//!
//! Double-entry posting protocol over a transactional SQL store: running
//! balance resolution, the two-leg atomic write, the transactional retry
//! boundary, and an audit of the ledger invariants.

pub mod journal;
pub mod balance;
pub mod store;
pub mod engine;
pub mod retry;
pub mod postgres;
pub mod memory;
pub mod audit;

pub use journal::{LedgerEntry, NewEntry, PostingLegs};
pub use balance::{BalanceMode, BalanceSnapshot, PriorBalances};
pub use store::{LedgerStore, LedgerTx};
pub use engine::{LedgerEngine, Posting, PostingReceipt};
pub use retry::{execute_tx, Committed, RetryPolicy, TransactionalWork};
pub use postgres::PgLedgerStore;
pub use memory::{InjectedFault, MemoryStore};
pub use audit::{audit, AuditReport, Violation};
