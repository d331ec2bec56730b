//! ledgerbench
//!
//! Concurrent contention workload for a double-entry ledger stored in a
//! transactional SQL database.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use clap::Parser;
use ledgerbench_ledger::{BalanceMode, LedgerEngine, LedgerStore, MemoryStore, PgLedgerStore};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod controller;
mod generator;
mod metrics;
mod reporter;
mod worker;

use config::{BenchConfig, PoolConfig, StoreKind, WorkloadConfig};
use controller::{Supervisor, SupervisorSettings};
use generator::{GeneratorKind, RequestGenerator};

/// ledgerbench CLI
#[derive(Parser, Debug)]
#[command(name = "ledgerbench")]
#[command(about = "Concurrent double-entry ledger workload for SQL stores")]
struct Args {
    /// Store URL: postgres://, postgresql:// or memory:
    database_url: String,

    /// Number of concurrent workers
    #[arg(short, long, default_value = "5")]
    concurrency: usize,

    /// Contention profile: many-many, few-few or few-one
    #[arg(short, long, default_value = "few-few")]
    generator: GeneratorKind,

    /// Synthesize prior balances instead of reading them
    #[arg(long)]
    no_running_balance: bool,

    /// Log every request
    #[arg(short, long)]
    verbose: bool,

    /// Amount moved by every posting
    #[arg(long, default_value = "5", allow_negative_numbers = true)]
    amount: i64,

    /// Currency of every posting
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Transaction attempts per posting, including the first
    #[arg(long, default_value = "10")]
    max_attempts: u32,

    /// Connection pool size (default: concurrency + 1)
    #[arg(long)]
    max_connections: Option<u32>,

    /// Rate report interval in milliseconds
    #[arg(long, default_value = "1000")]
    report_interval_ms: u64,

    /// Audit the ledger after the run
    #[arg(long)]
    verify: bool,

    /// Do not create the schema on startup
    #[arg(long)]
    skip_schema: bool,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> BenchConfig {
        let defaults = BenchConfig::default();
        let max_connections = self.max_connections.unwrap_or_else(|| {
            u32::try_from(self.concurrency.saturating_add(1)).unwrap_or(u32::MAX)
        });

        BenchConfig {
            database_url: self.database_url,
            concurrency: self.concurrency,
            workload: WorkloadConfig {
                generator: self.generator,
                balance_mode: BalanceMode::from_disabled_flag(self.no_running_balance),
                amount: self.amount,
                currency: self.currency,
            },
            retry: ledgerbench_ledger::RetryPolicy {
                max_attempts: self.max_attempts,
                ..defaults.retry
            },
            pool: PoolConfig { max_connections },
            seed: self.seed,
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            report_interval: Duration::from_millis(self.report_interval_ms),
            verbose: self.verbose,
            verify: self.verify,
            skip_schema: self.skip_schema,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn open_store(config: &BenchConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.store_kind()? {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Postgres => Arc::new(
            PgLedgerStore::connect(&config.database_url, config.pool.max_connections).await?,
        ),
    };

    if config.skip_schema {
        return Ok(store);
    }

    if let Err(e) = store.ensure_schema().await {
        warn!(error = %e, "Schema bootstrap failed, continuing");
    }

    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.into_config();
    config
        .validate()
        .map_err(|e| anyhow!("Configuration error: {}", e))?;

    info!("Starting ledgerbench");
    info!("Workers: {}", config.concurrency);
    info!("Generator: {}", config.workload.generator);
    info!("Balance mode: {}", config.workload.balance_mode);

    let store = open_store(&config).await?;
    let engine = Arc::new(LedgerEngine::new(
        store,
        config.workload.balance_mode,
        config.retry.clone(),
    ));
    let generator = Arc::new(RequestGenerator::new(
        config.workload.generator,
        config.workload.template(),
    ));

    let supervisor = Supervisor::new(
        Arc::clone(&engine),
        generator,
        SupervisorSettings::from(&config),
    );

    let started = Instant::now();
    let outcome = supervisor.run().await;
    let elapsed = started.elapsed();

    let metrics = supervisor.metrics().snapshot();
    info!("Run complete after {:.1}s", elapsed.as_secs_f64());
    info!("Attempted: {}", metrics.attempted);
    info!("Committed: {}", metrics.committed);
    info!("Retries: {}", metrics.retries);
    info!("Integrity violations: {}", metrics.integrity_violations);
    info!("Abandoned conflicts: {}", metrics.conflicts_abandoned);
    info!("Skipped self-transfers: {}", metrics.self_transfers_skipped);
    info!("Success rate: {:.2}%", metrics.success_rate() * 100.0);
    info!("Throughput: {:.1} postings/sec", metrics.throughput(elapsed));

    outcome?;

    if config.verify {
        let report = engine.audit().await?;
        info!(
            entries = report.entries,
            accounts = report.accounts,
            groups = report.groups,
            "Ledger audited"
        );
        if !report.is_clean() {
            for violation in &report.violations {
                error!(?violation, "Ledger invariant broken");
            }
            bail!("ledger audit found {} violations", report.violations.len());
        }
    }

    Ok(())
}
