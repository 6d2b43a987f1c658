use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use credit_ledger::application::{
    CreditService, Ledger, NotificationOutbox, NotificationWorker, PaymentCollector,
};
use credit_ledger::config::AppConfig;
use credit_ledger::domain::ports::{Clock, LedgerStoreRef};
use credit_ledger::domain::schedule::PenaltyPolicy;
use credit_ledger::infrastructure::clock::{FixedClock, SystemClock};
use credit_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use credit_ledger::infrastructure::notifier::LogNotifier;
use credit_ledger::infrastructure::rates::StaticRateSource;
#[cfg(feature = "storage-rocksdb")]
use credit_ledger::infrastructure::rocksdb::RocksDBStore;
use credit_ledger::interfaces::csv::account_writer::AccountWriter;
use credit_ledger::interfaces::csv::operation_reader::OperationReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Pin the clock to this instant (RFC 3339) instead of using wall time
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay an operations CSV and print the resulting accounts
    Apply {
        /// Input operations CSV file
        input: PathBuf,

        /// Run one collection sweep at this instant after the replay
        #[arg(long)]
        sweep_at: Option<DateTime<Utc>>,
    },
    /// Run a single collection sweep and print its report
    Sweep {
        /// Sweep instant, defaults to the clock
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run the periodic collector until Ctrl-C
    Run,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let store = open_store(cli.db_path)?;
    let clock: Arc<dyn Clock> = match cli.now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };

    let (outbox, receiver) = NotificationOutbox::channel();
    let worker = NotificationWorker::new(receiver, Arc::new(LogNotifier)).spawn();

    let policy = PenaltyPolicy::from(&config.collection);
    let ledger = Ledger::new(store, outbox, clock);
    let credits = CreditService::new(
        ledger.clone(),
        Arc::new(StaticRateSource::new(config.key_rate)),
        config.credit.clone(),
        policy,
    );
    let collector = PaymentCollector::new(ledger.clone(), policy);

    match cli.command {
        Command::Apply { input, sweep_at } => {
            let file = File::open(input).into_diagnostic()?;
            for operation in OperationReader::new(file).operations() {
                match operation {
                    Ok(op) => {
                        if let Err(e) = op.execute(&ledger, &credits, config.credit.currency).await
                        {
                            eprintln!("Error processing operation: {}", e);
                        }
                    }
                    Err(e) => {
                        eprintln!("Error reading operation: {}", e);
                    }
                }
            }

            if let Some(at) = sweep_at {
                collector.run_once(at).await.into_diagnostic()?;
            }

            let accounts = ledger.store().all_accounts().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = AccountWriter::new(stdout.lock());
            writer.write_accounts(accounts).into_diagnostic()?;
        }
        Command::Sweep { at } => {
            let at = at.unwrap_or_else(|| ledger.now());
            let report = collector.run_once(at).await.into_diagnostic()?;
            println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        }
        Command::Run => {
            let handle = collector.spawn(config.collection.interval());
            tokio::signal::ctrl_c().await.into_diagnostic()?;
            handle.shutdown().await;
        }
    }

    // Dropping every outbox sender lets the worker drain and exit.
    drop(collector);
    drop(credits);
    drop(ledger);
    worker.await.into_diagnostic()?;

    Ok(())
}
