use super::account::{Account, AccountId, UserId};
use super::credit::{Credit, CreditId};
use super::notification::Notification;
use super::schedule::{Installment, InstallmentId};
use super::transaction::{TransactionId, TransactionRecord};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Entity families that draw ids from their own sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Account,
    Transaction,
    Credit,
    Installment,
}

impl IdKind {
    pub fn name(&self) -> &'static str {
        match self {
            IdKind::Account => "account",
            IdKind::Transaction => "transaction",
            IdKind::Credit => "credit",
            IdKind::Installment => "installment",
        }
    }
}

/// Writes staged by a unit of work, persisted all at once on commit.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    pub accounts: BTreeMap<AccountId, Account>,
    pub removed_accounts: BTreeSet<AccountId>,
    pub transactions: Vec<TransactionRecord>,
    pub credits: BTreeMap<CreditId, Credit>,
    pub installments: BTreeMap<InstallmentId, Installment>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.removed_accounts.is_empty()
            && self.transactions.is_empty()
            && self.credits.is_empty()
            && self.installments.is_empty()
    }
}

/// Persistence for the ledger.
///
/// Reads always return committed state. `apply` must persist a whole
/// [`ChangeSet`] atomically or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;
    async fn accounts_by_owner(&self, owner: UserId) -> Result<Vec<Account>>;
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRecord>>;
    async fn transactions_for_account(&self, account: AccountId) -> Result<Vec<TransactionRecord>>;
    /// Records touching any account of `owner` stamped within `from..=to`, newest first.
    async fn transactions_for_owner(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>>;

    async fn credit(&self, id: CreditId) -> Result<Option<Credit>>;
    async fn credits_by_owner(&self, owner: UserId) -> Result<Vec<Credit>>;
    async fn credits_by_account(&self, account: AccountId) -> Result<Vec<Credit>>;

    async fn installment(&self, id: InstallmentId) -> Result<Option<Installment>>;
    /// A credit's installments ordered by due date.
    async fn installments_for_credit(&self, credit: CreditId) -> Result<Vec<Installment>>;
    /// `PENDING` installments due at or before `now`, ordered by due date.
    async fn pending_due(&self, now: DateTime<Utc>) -> Result<Vec<Installment>>;

    async fn next_id(&self, kind: IdKind) -> Result<u64>;
    async fn apply(&self, changes: ChangeSet) -> Result<()>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// Source of the central bank key rate, in percent.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn key_rate(&self) -> Result<Decimal>;
}

/// Delivers notifications to users. Failures are logged by the caller, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
