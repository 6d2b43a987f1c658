use crate::domain::account::{Account, AccountId, UserId};
use crate::domain::credit::{Credit, CreditId};
use crate::domain::ports::{ChangeSet, IdKind, LedgerStore};
use crate::domain::schedule::{Installment, InstallmentId, InstallmentStatus};
use crate::domain::transaction::{TransactionId, TransactionRecord, newest_first};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for account states.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for the transaction history.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for credits.
pub const CF_CREDITS: &str = "credits";
/// Column Family for installments.
pub const CF_INSTALLMENTS: &str = "installments";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";
/// Index of pending installments keyed by `due_ts | id`.
pub const CF_PENDING_DUE: &str = "pending_due";
/// Index of installments keyed by `credit_id | due_ts | id`.
pub const CF_CREDIT_INSTALLMENTS: &str = "credit_installments";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_ACCOUNTS,
    CF_TRANSACTIONS,
    CF_CREDITS,
    CF_INSTALLMENTS,
    CF_META,
    CF_PENDING_DUE,
    CF_CREDIT_INSTALLMENTS,
];

/// Order-preserving big-endian encoding of a timestamp.
fn ts_key(ts: DateTime<Utc>) -> [u8; 8] {
    ((ts.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

fn due_key(installment: &Installment) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&ts_key(installment.due_date));
    key.extend_from_slice(&installment.id.to_be_bytes());
    key
}

fn credit_key(installment: &Installment) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&installment.credit_id.to_be_bytes());
    key.extend_from_slice(&due_key(installment));
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn id_from_key(key: &[u8]) -> Result<u64> {
    let tail: [u8; 8] = key
        .get(key.len().saturating_sub(8)..)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LedgerError::internal("malformed index key"))?;
    Ok(u64::from_be_bytes(tail))
}

/// A persistent ledger store on RocksDB.
///
/// Each entity lives in its own column family, keyed by its big-endian id.
/// A [`ChangeSet`] is written as a single `WriteBatch`, so it lands
/// atomically together with the index updates it implies.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Serializes id allocation and the read-then-write of index maintenance.
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::internal(format!("{name} column family not found")))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, id: u64) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            let decoded: T = decode(&value)?;
            if keep(&decoded) {
                items.push(decoded);
            }
        }
        Ok(items)
    }

    /// Loads installments referenced by an index, walking keys from `from`
    /// while `within` holds.
    fn installments_from_index(
        &self,
        index: &str,
        from: &[u8],
        within: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<Installment>> {
        let mut installments = Vec::new();
        let mode = IteratorMode::From(from, Direction::Forward);
        for item in self.db.iterator_cf(self.cf(index)?, mode) {
            let (key, _) = item?;
            if !within(&key[..]) {
                break;
            }
            let id = id_from_key(&key)?;
            let installment = self
                .get(CF_INSTALLMENTS, id)?
                .ok_or_else(|| LedgerError::internal(format!("dangling index entry for installment {id}")))?;
            installments.push(installment);
        }
        Ok(installments)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get(CF_ACCOUNTS, id)
    }

    async fn accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS, |a: &Account| a.owner == owner)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS, |_: &Account| true)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        self.get(CF_TRANSACTIONS, id)
    }

    async fn transactions_for_account(&self, account: AccountId) -> Result<Vec<TransactionRecord>> {
        self.scan(CF_TRANSACTIONS, |t: &TransactionRecord| t.involves(account))
    }

    async fn transactions_for_owner(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        let owned: HashSet<AccountId> = self
            .scan(CF_ACCOUNTS, |a: &Account| a.owner == owner)?
            .into_iter()
            .map(|a| a.id)
            .collect();
        let mut records = self.scan(CF_TRANSACTIONS, |t: &TransactionRecord| {
            t.within(from, to) && t.involves_any(&owned)
        })?;
        newest_first(&mut records);
        Ok(records)
    }

    async fn credit(&self, id: CreditId) -> Result<Option<Credit>> {
        self.get(CF_CREDITS, id)
    }

    async fn credits_by_owner(&self, owner: UserId) -> Result<Vec<Credit>> {
        self.scan(CF_CREDITS, |c: &Credit| c.owner == owner)
    }

    async fn credits_by_account(&self, account: AccountId) -> Result<Vec<Credit>> {
        self.scan(CF_CREDITS, |c: &Credit| c.account == account)
    }

    async fn installment(&self, id: InstallmentId) -> Result<Option<Installment>> {
        self.get(CF_INSTALLMENTS, id)
    }

    async fn installments_for_credit(&self, credit: CreditId) -> Result<Vec<Installment>> {
        let prefix = credit.to_be_bytes();
        self.installments_from_index(CF_CREDIT_INSTALLMENTS, &prefix, |key| {
            key.starts_with(&prefix)
        })
    }

    async fn pending_due(&self, now: DateTime<Utc>) -> Result<Vec<Installment>> {
        let bound = ts_key(now);
        self.installments_from_index(CF_PENDING_DUE, &[], |key| key[..8] <= bound[..])
    }

    async fn next_id(&self, kind: IdKind) -> Result<u64> {
        let _guard = self.writer.lock().await;
        let meta = self.cf(CF_META)?;
        let current = match self.db.get_cf(meta, kind.name())? {
            Some(bytes) => id_from_key(&bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(meta, kind.name(), next.to_be_bytes())?;
        Ok(next)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut batch = WriteBatch::default();

        let accounts = self.cf(CF_ACCOUNTS)?;
        for (id, account) in &changes.accounts {
            batch.put_cf(accounts, id.to_be_bytes(), encode(account)?);
        }
        for id in &changes.removed_accounts {
            batch.delete_cf(accounts, id.to_be_bytes());
        }

        let transactions = self.cf(CF_TRANSACTIONS)?;
        for record in &changes.transactions {
            batch.put_cf(transactions, record.id.to_be_bytes(), encode(record)?);
        }

        let credits = self.cf(CF_CREDITS)?;
        for (id, credit) in &changes.credits {
            batch.put_cf(credits, id.to_be_bytes(), encode(credit)?);
        }

        let installments = self.cf(CF_INSTALLMENTS)?;
        let pending = self.cf(CF_PENDING_DUE)?;
        let by_credit = self.cf(CF_CREDIT_INSTALLMENTS)?;
        for (id, installment) in &changes.installments {
            let previous: Option<Installment> = self.get(CF_INSTALLMENTS, *id)?;
            if let Some(previous) = &previous
                && previous.status == InstallmentStatus::Pending
            {
                batch.delete_cf(pending, due_key(previous));
            }
            if installment.status == InstallmentStatus::Pending {
                batch.put_cf(pending, due_key(installment), b"");
            }
            if previous.is_none() {
                batch.put_cf(by_credit, credit_key(installment), b"");
            }
            batch.put_cf(installments, id.to_be_bytes(), encode(installment)?);
        }

        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountType;
    use crate::domain::amortization::ScheduledPayment;
    use crate::domain::money::{Amount, Balance, Currency};
    use crate::domain::transaction::{TransactionStatus, TransactionType};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, day, 0, 0, 0).unwrap()
    }

    fn installment(id: InstallmentId, credit_id: CreditId, due_date: DateTime<Utc>) -> Installment {
        Installment::new(
            id,
            credit_id,
            ScheduledPayment {
                due_date,
                principal: dec!(10),
                interest: dec!(1),
                total: dec!(11),
            },
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_accounts_survive_reopen() {
        let dir = tempdir().unwrap();
        let mut account = Account::new(1, 4, Currency::Eur, AccountType::Savings, at(1));
        account.balance = Balance::new(dec!(100.0));

        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            assert_eq!(store.next_id(IdKind::Account).await.unwrap(), 1);
            let mut changes = ChangeSet::default();
            changes.accounts.insert(1, account.clone());
            store.apply(changes).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.account(1).await.unwrap(), Some(account.clone()));
        assert_eq!(store.accounts_by_owner(4).await.unwrap(), vec![account]);
        assert_eq!(store.next_id(IdKind::Account).await.unwrap(), 2);
        assert_eq!(store.next_id(IdKind::Credit).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_installment_indexes() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut changes = ChangeSet::default();
        for inst in [
            installment(3, 1, at(20)),
            installment(1, 1, at(5)),
            installment(2, 2, at(10)),
        ] {
            changes.installments.insert(inst.id, inst);
        }
        store.apply(changes).await.unwrap();

        let ids = |list: Vec<Installment>| list.iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(store.installments_for_credit(1).await.unwrap()), vec![1, 3]);
        assert_eq!(ids(store.installments_for_credit(2).await.unwrap()), vec![2]);
        assert_eq!(ids(store.pending_due(at(10)).await.unwrap()), vec![1, 2]);
        assert!(store.pending_due(at(1)).await.unwrap().is_empty());

        let mut paid = installment(1, 1, at(5));
        paid.mark_paid();
        let mut changes = ChangeSet::default();
        changes.installments.insert(1, paid);
        store.apply(changes).await.unwrap();

        assert_eq!(ids(store.pending_due(at(30)).await.unwrap()), vec![2, 3]);
        assert_eq!(ids(store.installments_for_credit(1).await.unwrap()), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_rocksdb_transactions_for_owner() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let record = |id, destination, day| TransactionRecord {
            id,
            r#type: TransactionType::Deposit,
            source: None,
            destination: Some(destination),
            amount: Amount::new(dec!(5.00)).unwrap(),
            currency: Currency::Eur,
            status: TransactionStatus::Completed,
            description: None,
            instrument: None,
            timestamp: at(day),
        };

        let mut changes = ChangeSet::default();
        changes
            .accounts
            .insert(1, Account::new(1, 4, Currency::Eur, AccountType::Checking, at(1)));
        changes
            .accounts
            .insert(2, Account::new(2, 8, Currency::Eur, AccountType::Checking, at(1)));
        changes.transactions.push(record(1, 1, 3));
        changes.transactions.push(record(2, 2, 4));
        changes.transactions.push(record(3, 1, 9));
        store.apply(changes).await.unwrap();

        let ids = |list: Vec<TransactionRecord>| list.iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(
            ids(store.transactions_for_owner(4, at(1), at(30)).await.unwrap()),
            vec![3, 1]
        );
        assert_eq!(
            ids(store.transactions_for_owner(4, at(1), at(5)).await.unwrap()),
            vec![1]
        );
    }
}
