use super::notifications::NotificationOutbox;
use crate::domain::account::{Account, AccountId};
use crate::domain::credit::{Credit, CreditId};
use crate::domain::money::Balance;
use crate::domain::notification::Notification;
use crate::domain::ports::{ChangeSet, IdKind, LedgerStoreRef};
use crate::domain::schedule::{Installment, InstallmentId};
use crate::domain::transaction::{TransactionId, TransactionRecord};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Exclusive per-account row locks.
///
/// Two units of work touching the same account serialize on its lock; units
/// of work on disjoint accounts never wait on each other. A row's entry lives
/// only as long as someone holds or waits for it.
#[derive(Default, Debug)]
pub struct RowLocks {
    rows: StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(self: &Arc<Self>, account: AccountId) -> RowGuard {
        let row = self.rows().entry(account).or_default().clone();
        let guard = row.lock_owned().await;
        RowGuard {
            account,
            guard: Some(guard),
            locks: Arc::clone(self),
        }
    }

    /// Number of rows currently held or awaited.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<AccountId, Arc<Mutex<()>>>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, account: AccountId) {
        let mut rows = self.rows();
        if let Some(row) = rows.get(&account)
            && Arc::strong_count(row) == 1
        {
            rows.remove(&account);
        }
    }
}

/// A held row lock. Dropping it unlocks the row and forgets it once nobody
/// else is waiting.
#[derive(Debug)]
pub struct RowGuard {
    account: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<RowLocks>,
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(self.account);
    }
}

/// A scoped, isolated transaction over the ledger.
///
/// Reads through [`UnitOfWork::lock_account`] take the account's row lock and
/// see this unit's own staged writes. Nothing is visible to anyone else until
/// [`UnitOfWork::commit`] persists the whole change set; locks are released
/// only after that. Dropping an uncommitted unit of work rolls it back.
pub struct UnitOfWork {
    store: LedgerStoreRef,
    locks: Arc<RowLocks>,
    outbox: NotificationOutbox,
    held: HashMap<AccountId, RowGuard>,
    changes: ChangeSet,
    notifications: Vec<Notification>,
}

impl UnitOfWork {
    pub(crate) fn new(
        store: LedgerStoreRef,
        locks: Arc<RowLocks>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            store,
            locks,
            outbox,
            held: HashMap::new(),
            changes: ChangeSet::default(),
            notifications: Vec::new(),
        }
    }

    /// Locks the account row and returns its current state.
    pub async fn lock_account(&mut self, id: AccountId) -> Result<Account> {
        if !self.held.contains_key(&id) {
            let guard = self.locks.lock(id).await;
            self.held.insert(id, guard);
        }
        if self.changes.removed_accounts.contains(&id) {
            return Err(LedgerError::not_found("account", id));
        }
        if let Some(staged) = self.changes.accounts.get(&id) {
            return Ok(staged.clone());
        }
        self.store
            .account(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    /// Locks several accounts in ascending id order so that concurrent
    /// multi-account units of work cannot deadlock.
    pub async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        for id in &ordered {
            self.lock_account(*id).await?;
        }
        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            accounts.push(self.lock_account(*id).await?);
        }
        Ok(accounts)
    }

    /// Locked read-modify-write of one balance.
    ///
    /// Fails with `InsufficientFunds` without staging anything if the result
    /// would be negative.
    pub async fn mutate_balance(&mut self, id: AccountId, delta: Decimal) -> Result<Balance> {
        let mut account = self.lock_account(id).await?;
        let balance = account.apply_delta(delta)?;
        self.changes.accounts.insert(id, account);
        Ok(balance)
    }

    /// Stages a new account. Its id must come from [`UnitOfWork::next_id`].
    pub async fn insert_account(&mut self, account: Account) {
        let guard = self.locks.lock(account.id).await;
        self.held.insert(account.id, guard);
        self.changes.accounts.insert(account.id, account);
    }

    /// Stages an updated account already locked by this unit of work.
    pub fn put_account(&mut self, account: Account) -> Result<()> {
        if !self.held.contains_key(&account.id) {
            return Err(LedgerError::internal(format!(
                "account {} updated without holding its lock",
                account.id
            )));
        }
        self.changes.accounts.insert(account.id, account);
        Ok(())
    }

    /// Stages the removal of an account already locked by this unit of work.
    pub fn remove_account(&mut self, id: AccountId) -> Result<()> {
        if !self.held.contains_key(&id) {
            return Err(LedgerError::internal(format!(
                "account {id} removed without holding its lock"
            )));
        }
        self.changes.accounts.remove(&id);
        self.changes.removed_accounts.insert(id);
        Ok(())
    }

    pub async fn next_id(&self, kind: IdKind) -> Result<u64> {
        self.store.next_id(kind).await
    }

    /// Stages a transaction record, assigning its id.
    pub async fn record(&mut self, mut record: TransactionRecord) -> Result<TransactionId> {
        record.id = self.next_id(IdKind::Transaction).await?;
        let id = record.id;
        self.changes.transactions.push(record);
        Ok(id)
    }

    pub fn put_credit(&mut self, credit: Credit) {
        self.changes.credits.insert(credit.id, credit);
    }

    pub fn put_installment(&mut self, installment: Installment) {
        self.changes.installments.insert(installment.id, installment);
    }

    /// Reads an installment, preferring this unit's staged version.
    pub async fn installment(&self, id: InstallmentId) -> Result<Option<Installment>> {
        if let Some(staged) = self.changes.installments.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.installment(id).await
    }

    /// Reads a credit, preferring this unit's staged version.
    pub async fn credit(&self, id: CreditId) -> Result<Option<Credit>> {
        if let Some(staged) = self.changes.credits.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.credit(id).await
    }

    /// Queues a notification to be released once this unit of work commits.
    pub fn notify_after_commit(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub async fn commit(self) -> Result<()> {
        let Self {
            store,
            outbox,
            held,
            changes,
            notifications,
            ..
        } = self;

        if !changes.is_empty() {
            store.apply(changes).await?;
        }
        drop(held);
        outbox.publish(notifications);
        Ok(())
    }

    pub fn rollback(self) {
        debug!(
            staged_accounts = self.changes.accounts.len(),
            staged_transactions = self.changes.transactions.len(),
            "rolling back unit of work"
        );
    }
}
