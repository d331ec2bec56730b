//! PostgreSQL (and CockroachDB) ledger store.

use async_trait::async_trait;
use ledgerbench_common::{AccountId, PostingGroupId, PostingRequest, Result};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use crate::balance::BalanceSnapshot;
use crate::journal::{LedgerEntry, PostingLegs};
use crate::store::{LedgerStore, LedgerTx};

/// Database the default URL points at. CockroachDB accepts connections to a
/// database that does not exist yet, so it is created before the table.
const CREATE_DATABASE: &str = "CREATE DATABASE IF NOT EXISTS ledger";

/// Schema bootstrap, one statement per entry.
///
/// The table is named `accounts` but holds ledger entries.
const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS accounts (
  causality_id BIGINT NOT NULL,
  posting_group_id BIGINT NOT NULL,

  amount BIGINT,
  balance BIGINT,
  currency VARCHAR,

  created TIMESTAMP,
  value_date TIMESTAMP,

  account_id VARCHAR,
  transaction_id VARCHAR,

  scheme VARCHAR,

  PRIMARY KEY (account_id, posting_group_id),
  UNIQUE (account_id, causality_id)
)"#,
    "CREATE INDEX IF NOT EXISTS accounts_transaction_id_idx ON accounts (transaction_id)",
    "CREATE INDEX IF NOT EXISTS accounts_posting_group_id_idx ON accounts (posting_group_id)",
];

const LAST_ENTRY: &str = "SELECT causality_id, balance FROM accounts \
     WHERE account_id = $1 ORDER BY causality_id DESC LIMIT 1";

const INSERT_LEGS: &str = r#"
INSERT INTO accounts (
  posting_group_id,
  account_id,
  causality_id,
  amount,
  balance,
  currency,
  transaction_id,
  scheme,
  created,
  value_date
)
VALUES
  ($1, $2, $3, $4, $5, $10, $11, $12, now(), now()),
  ($1, $6, $7, $8, $9, $10, $11, $12, now(), now())"#;

const ALL_ENTRIES: &str = "SELECT account_id, posting_group_id, causality_id, amount, balance, \
     currency, created, value_date, transaction_id, scheme \
     FROM accounts ORDER BY account_id, causality_id";

/// Ledger store backed by a Postgres-wire database.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect a pool of at most `max_connections` connections.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        posting_group_id: PostingGroupId::new(row.try_get("posting_group_id")?),
        causality_id: row.try_get("causality_id")?,
        amount: row.try_get::<Option<i64>, _>("amount")?.unwrap_or_default(),
        balance: row.try_get::<Option<i64>, _>("balance")?.unwrap_or_default(),
        currency: row.try_get("currency")?,
        created: row.try_get("created")?,
        value_date: row.try_get("value_date")?,
        transaction_id: row.try_get("transaction_id")?,
        scheme: row.try_get("scheme")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> Result<()> {
        // Fails on servers without IF NOT EXISTS support or without the privilege.
        if let Err(e) = sqlx::query(CREATE_DATABASE).execute(&self.pool).await {
            debug!(error = %e, "Database creation skipped");
        }

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Ledger schema ready");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(ALL_ENTRIES).fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn last_entry(&mut self, account: &AccountId) -> Result<Option<BalanceSnapshot>> {
        let row: Option<(i64, Option<i64>)> = sqlx::query_as(LAST_ENTRY)
            .bind(account.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(|(causality_id, balance)| {
            BalanceSnapshot::new(causality_id, balance.unwrap_or_default())
        }))
    }

    async fn insert_legs(&mut self, request: &PostingRequest, legs: &PostingLegs) -> Result<()> {
        sqlx::query(INSERT_LEGS)
            .bind(request.group.get())
            .bind(legs.credit.account_id.as_str())
            .bind(legs.credit.causality_id)
            .bind(legs.credit.amount)
            .bind(legs.credit.balance)
            .bind(legs.debit.account_id.as_str())
            .bind(legs.debit.causality_id)
            .bind(legs.debit.amount)
            .bind(legs.debit.balance)
            .bind(request.currency.as_str())
            .bind(request.transaction.as_deref())
            .bind(request.scheme.as_deref())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
