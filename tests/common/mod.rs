#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use credit_ledger::application::{CreditService, Ledger, NotificationOutbox, PaymentCollector};
use credit_ledger::config::CreditConfig;
use credit_ledger::domain::account::{AccountId, AccountType, UserId};
use credit_ledger::domain::money::Currency;
use credit_ledger::domain::notification::Notification;
use credit_ledger::domain::ports::LedgerStoreRef;
use credit_ledger::domain::schedule::PenaltyPolicy;
use credit_ledger::infrastructure::clock::FixedClock;
use credit_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use credit_ledger::infrastructure::rates::StaticRateSource;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Fully wired services over one store, with a clock the test controls.
pub struct Harness {
    pub ledger: Ledger,
    pub credits: CreditService,
    pub collector: PaymentCollector,
    pub clock: Arc<FixedClock>,
    pub notifications: UnboundedReceiver<Notification>,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(Arc::new(InMemoryLedgerStore::new()))
}

pub fn harness_with(store: LedgerStoreRef) -> Harness {
    let (outbox, notifications) = NotificationOutbox::channel();
    let clock = Arc::new(FixedClock::new(start()));
    let ledger = Ledger::new(store, outbox, clock.clone());
    let policy = PenaltyPolicy::default();
    let credits = CreditService::new(
        ledger.clone(),
        Arc::new(StaticRateSource::new(None)),
        CreditConfig::default(),
        policy,
    );
    let collector = PaymentCollector::new(ledger.clone(), policy);
    Harness {
        ledger,
        credits,
        collector,
        clock,
        notifications,
    }
}

pub async fn open_account(ledger: &Ledger, owner: UserId, balance: Decimal) -> AccountId {
    ledger
        .open_account(owner, Currency::Rub, AccountType::Checking, balance)
        .await
        .unwrap()
        .id
}

/// Writes an operations CSV with `rows` deposits of 1.00 into account 1,
/// preceded by the account's opening row.
pub fn generate_operations_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "user", "account", "target", "amount", "term", "rate"])?;
    wtr.write_record(["open", "1", "", "", "", "", ""])?;
    for _ in 0..rows {
        wtr.write_record(["deposit", "1", "1", "", "1.00", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
