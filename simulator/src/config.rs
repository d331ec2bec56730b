//! Workload configuration.

use std::time::Duration;

use ledgerbench_common::{LedgerError, PostingRequest, DEFAULT_AMOUNT, DEFAULT_CURRENCY};
use ledgerbench_ledger::{BalanceMode, RetryPolicy};

use crate::generator::GeneratorKind;

/// URL scheme selecting the in-process store.
pub const MEMORY_SCHEME: &str = "memory:";

/// Which store a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// A Postgres-wire database such as CockroachDB.
    Postgres,
    /// The in-process store.
    Memory,
}

impl StoreKind {
    /// Pick the store for `url`.
    pub fn from_url(url: &str) -> Result<Self, LedgerError> {
        if url.starts_with(MEMORY_SCHEME) {
            return Ok(StoreKind::Memory);
        }

        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(StoreKind::Postgres);
        }

        Err(LedgerError::ConfigurationError(format!(
            "unsupported store URL {:?}, expected postgres://, postgresql:// or {}",
            url, MEMORY_SCHEME
        )))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum open connections.
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_connections: 6 }
    }
}

/// What each request looks like.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Contention profile.
    pub generator: GeneratorKind,
    /// Whether priors are read or synthesized.
    pub balance_mode: BalanceMode,
    /// Amount of every posting.
    pub amount: i64,
    /// Currency of every posting.
    pub currency: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorKind::FewFew,
            balance_mode: BalanceMode::Running,
            amount: DEFAULT_AMOUNT,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl WorkloadConfig {
    /// Request every generated posting starts from.
    pub fn template(&self) -> PostingRequest {
        PostingRequest {
            amount: self.amount,
            currency: self.currency.clone(),
            ..PostingRequest::template()
        }
    }
}

/// Main benchmark configuration.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Store URL.
    pub database_url: String,
    /// Concurrent workers.
    pub concurrency: usize,
    /// Request shape.
    pub workload: WorkloadConfig,
    /// Conflict retry policy.
    pub retry: RetryPolicy,
    /// Connection pool.
    pub pool: PoolConfig,
    /// Seed for reproducible runs.
    pub seed: Option<u64>,
    /// Stop after this long. `None` runs until interrupted.
    pub duration: Option<Duration>,
    /// Rate report interval.
    pub report_interval: Duration,
    /// Log every request.
    pub verbose: bool,
    /// Audit the ledger after the run.
    pub verify: bool,
    /// Skip schema bootstrap.
    pub skip_schema: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://root@localhost:26257/ledger?sslmode=disable".to_string(),
            concurrency: 5,
            workload: WorkloadConfig::default(),
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
            seed: None,
            duration: None,
            report_interval: Duration::from_secs(1),
            verbose: false,
            verify: false,
            skip_schema: false,
        }
    }
}

impl BenchConfig {
    /// Store selected by the URL.
    pub fn store_kind(&self) -> Result<StoreKind, LedgerError> {
        StoreKind::from_url(&self.database_url)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if let Err(e) = self.store_kind() {
            return Err(e.to_string());
        }

        if self.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.pool.max_connections == 0 {
            return Err("Pool must allow at least one connection".to_string());
        }

        if self.report_interval.is_zero() {
            return Err("Report interval cannot be 0".to_string());
        }

        if self.workload.amount == i64::MIN {
            return Err("Amount cannot be negated".to_string());
        }

        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_kind().unwrap(), StoreKind::Postgres);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = BenchConfig::default();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.database_url = "mysql://localhost/ledger".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_kind() {
        assert_eq!(StoreKind::from_url("memory:").unwrap(), StoreKind::Memory);
        assert_eq!(
            StoreKind::from_url("postgres://u@h/db").unwrap(),
            StoreKind::Postgres
        );
        assert!(StoreKind::from_url("").is_err());
    }

    #[test]
    fn test_template_overrides() {
        let workload = WorkloadConfig {
            amount: 7,
            currency: "EUR".to_string(),
            ..WorkloadConfig::default()
        };
        let template = workload.template();
        assert_eq!(template.amount, 7);
        assert_eq!(template.currency, "EUR");
        assert_eq!(template.account_a.as_str(), "myacc");
    }
}
