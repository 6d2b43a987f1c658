use crate::domain::account::{Account, AccountId, UserId};
use crate::domain::credit::{Credit, CreditId};
use crate::domain::ports::{ChangeSet, IdKind, LedgerStore};
use crate::domain::schedule::{Installment, InstallmentId, InstallmentStatus};
use crate::domain::transaction::{TransactionId, TransactionRecord, newest_first};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

type DueKey = (DateTime<Utc>, InstallmentId);

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    transactions: BTreeMap<TransactionId, TransactionRecord>,
    credits: HashMap<CreditId, Credit>,
    installments: HashMap<InstallmentId, Installment>,
    /// Installments of each credit, ordered by due date.
    by_credit: HashMap<CreditId, BTreeSet<DueKey>>,
    /// Pending installments ordered by due date.
    pending: BTreeSet<DueKey>,
}

impl Tables {
    fn put_installment(&mut self, installment: Installment) {
        let key = (installment.due_date, installment.id);
        if let Some(previous) = self.installments.get(&installment.id)
            && previous.status == InstallmentStatus::Pending
        {
            self.pending.remove(&(previous.due_date, previous.id));
        }
        if installment.status == InstallmentStatus::Pending {
            self.pending.insert(key);
        }
        self.by_credit
            .entry(installment.credit_id)
            .or_default()
            .insert(key);
        self.installments.insert(installment.id, installment);
    }
}

#[derive(Default)]
struct Sequences {
    account: AtomicU64,
    transaction: AtomicU64,
    credit: AtomicU64,
    installment: AtomicU64,
}

impl Sequences {
    fn next(&self, kind: IdKind) -> u64 {
        let counter = match kind {
            IdKind::Account => &self.account,
            IdKind::Transaction => &self.transaction,
            IdKind::Credit => &self.credit,
            IdKind::Installment => &self.installment,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A thread-safe in-memory ledger store.
///
/// All tables sit behind a single `RwLock`, so a change set is applied
/// atomically with respect to every reader. `Clone` shares the same tables.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    sequences: Arc<Sequences>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.get(&id).cloned())
    }

    async fn accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<_> = tables
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<_> = tables.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn transactions_for_account(&self, account: AccountId) -> Result<Vec<TransactionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|t| t.involves(account))
            .cloned()
            .collect())
    }

    async fn transactions_for_owner(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        let tables = self.tables.read().await;
        let owned: HashSet<AccountId> = tables
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .map(|a| a.id)
            .collect();
        let mut records: Vec<_> = tables
            .transactions
            .values()
            .filter(|t| t.within(from, to) && t.involves_any(&owned))
            .cloned()
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn credit(&self, id: CreditId) -> Result<Option<Credit>> {
        let tables = self.tables.read().await;
        Ok(tables.credits.get(&id).cloned())
    }

    async fn credits_by_owner(&self, owner: UserId) -> Result<Vec<Credit>> {
        let tables = self.tables.read().await;
        let mut credits: Vec<_> = tables
            .credits
            .values()
            .filter(|c| c.owner == owner)
            .cloned()
            .collect();
        credits.sort_by_key(|c| c.id);
        Ok(credits)
    }

    async fn credits_by_account(&self, account: AccountId) -> Result<Vec<Credit>> {
        let tables = self.tables.read().await;
        let mut credits: Vec<_> = tables
            .credits
            .values()
            .filter(|c| c.account == account)
            .cloned()
            .collect();
        credits.sort_by_key(|c| c.id);
        Ok(credits)
    }

    async fn installment(&self, id: InstallmentId) -> Result<Option<Installment>> {
        let tables = self.tables.read().await;
        Ok(tables.installments.get(&id).cloned())
    }

    async fn installments_for_credit(&self, credit: CreditId) -> Result<Vec<Installment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_credit
            .get(&credit)
            .into_iter()
            .flatten()
            .filter_map(|(_, id)| tables.installments.get(id).cloned())
            .collect())
    }

    async fn pending_due(&self, now: DateTime<Utc>) -> Result<Vec<Installment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .pending
            .range(..=(now, InstallmentId::MAX))
            .filter_map(|(_, id)| tables.installments.get(id).cloned())
            .collect())
    }

    async fn next_id(&self, kind: IdKind) -> Result<u64> {
        Ok(self.sequences.next(kind))
    }

    async fn apply(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables.write().await;
        for (id, account) in changes.accounts {
            tables.accounts.insert(id, account);
        }
        for id in changes.removed_accounts {
            tables.accounts.remove(&id);
        }
        for record in changes.transactions {
            tables.transactions.insert(record.id, record);
        }
        for (id, credit) in changes.credits {
            tables.credits.insert(id, credit);
        }
        for installment in changes.installments.into_values() {
            tables.put_installment(installment);
        }
        Ok(())
    }
}
