use super::notifications::NotificationOutbox;
use super::unit_of_work::{RowLocks, UnitOfWork};
use crate::domain::account::{Account, AccountId, AccountType, UserId};
use crate::domain::credit::CreditStatus;
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::ports::{Clock, IdKind, LedgerStoreRef};
use crate::domain::transaction::{
    TransactionId, TransactionRecord, TransactionStatus, TransactionType,
};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Balance storage and money movement between accounts.
///
/// Every balance change goes through a [`UnitOfWork`] holding the account's
/// row lock, and is recorded in the same unit as exactly one
/// [`TransactionRecord`].
#[derive(Clone)]
pub struct Ledger {
    store: LedgerStoreRef,
    locks: Arc<RowLocks>,
    outbox: NotificationOutbox,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: LedgerStoreRef, outbox: NotificationOutbox, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks: Arc::new(RowLocks::new()),
            outbox,
            clock,
        }
    }

    /// Opens a new unit of work.
    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new(self.store.clone(), self.locks.clone(), self.outbox.clone())
    }

    pub fn store(&self) -> &LedgerStoreRef {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Builds a completed transaction record timestamped now. The id is
    /// assigned when the record is staged.
    pub fn completed_record(
        &self,
        r#type: TransactionType,
        source: Option<AccountId>,
        destination: Option<AccountId>,
        amount: Amount,
        currency: Currency,
        description: Option<String>,
    ) -> TransactionRecord {
        TransactionRecord {
            id: 0,
            r#type,
            source,
            destination,
            amount,
            currency,
            status: TransactionStatus::Completed,
            description,
            instrument: None,
            timestamp: self.now(),
        }
    }

    /// Applies a signed delta to one account in its own unit of work.
    ///
    /// The caller is responsible for any transaction record.
    #[instrument(name = "ledger.mutate", skip(self), err)]
    pub async fn mutate(&self, account: AccountId, delta: Decimal) -> Result<Balance> {
        let mut uow = self.begin();
        let balance = uow.mutate_balance(account, delta).await?;
        uow.commit().await?;
        Ok(balance)
    }

    #[instrument(name = "ledger.open_account", skip(self), err)]
    pub async fn open_account(
        &self,
        owner: UserId,
        currency: Currency,
        account_type: AccountType,
        initial_balance: Decimal,
    ) -> Result<Account> {
        if initial_balance < Decimal::ZERO {
            return Err(LedgerError::ValidationError(
                "initial balance cannot be negative".to_string(),
            ));
        }

        let mut uow = self.begin();
        let id = uow.next_id(IdKind::Account).await?;
        uow.insert_account(Account::new(id, owner, currency, account_type, self.now()))
            .await;

        if initial_balance > Decimal::ZERO {
            let amount = Amount::new(initial_balance)?;
            uow.mutate_balance(id, amount.credit()).await?;
            let record = self.completed_record(
                TransactionType::Deposit,
                None,
                Some(id),
                amount,
                currency,
                Some("Initial deposit".to_string()),
            );
            uow.record(record).await?;
        }

        let account = uow.lock_account(id).await?;
        uow.commit().await?;
        info!(account = id, owner, "account opened");
        Ok(account)
    }

    /// Ownership-checked read.
    pub async fn account(&self, id: AccountId, owner: UserId) -> Result<Account> {
        let account = self.load_account(id).await?;
        account.ensure_owned_by(owner)?;
        Ok(account)
    }

    pub async fn accounts(&self, owner: UserId) -> Result<Vec<Account>> {
        self.store.accounts_by_owner(owner).await
    }

    pub async fn transactions(
        &self,
        account: AccountId,
        owner: UserId,
    ) -> Result<Vec<TransactionRecord>> {
        self.account(account, owner).await?;
        self.store.transactions_for_account(account).await
    }

    /// Every transaction touching any of `owner`'s accounts, newest first.
    pub async fn user_transactions(&self, owner: UserId) -> Result<Vec<TransactionRecord>> {
        self.store
            .transactions_for_owner(owner, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
            .await
    }

    /// Like [`Ledger::user_transactions`], limited to `from..=to`.
    pub async fn transactions_between(
        &self,
        owner: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>> {
        if from > to {
            return Err(LedgerError::ValidationError(
                "start of the range is after its end".to_string(),
            ));
        }
        self.store.transactions_for_owner(owner, from, to).await
    }

    /// Activates or deactivates an account. Inactive accounts take no
    /// deposits, withdrawals, payments or transfers.
    #[instrument(name = "ledger.set_active", skip(self), err)]
    pub async fn set_active(&self, id: AccountId, owner: UserId, active: bool) -> Result<Account> {
        let mut uow = self.begin();
        let mut account = uow.lock_account(id).await?;
        account.ensure_owned_by(owner)?;
        if account.active == active {
            return Ok(account);
        }
        account.active = active;
        uow.put_account(account.clone())?;
        uow.commit().await?;

        info!(account = id, active, "account activity changed");
        Ok(account)
    }

    #[instrument(name = "ledger.deposit", skip(self, description), err)]
    pub async fn deposit(
        &self,
        account: AccountId,
        owner: UserId,
        amount: Amount,
        description: Option<String>,
    ) -> Result<TransactionId> {
        let target = self.account(account, owner).await?;
        target.ensure_active()?;

        let mut uow = self.begin();
        uow.lock_account(account).await?.ensure_active()?;
        uow.mutate_balance(account, amount.credit()).await?;
        let record = self.completed_record(
            TransactionType::Deposit,
            None,
            Some(account),
            amount,
            target.currency,
            description,
        );
        let id = uow.record(record).await?;
        uow.commit().await?;

        info!(transaction = id, account, %amount, "deposit completed");
        Ok(id)
    }

    #[instrument(name = "ledger.withdraw", skip(self, description), err)]
    pub async fn withdraw(
        &self,
        account: AccountId,
        owner: UserId,
        amount: Amount,
        description: Option<String>,
    ) -> Result<TransactionId> {
        let source = self.debitable(account, owner, amount).await?;

        let mut uow = self.begin();
        uow.lock_account(account).await?.ensure_active()?;
        uow.mutate_balance(account, amount.debit()).await?;
        let record = self.completed_record(
            TransactionType::Withdrawal,
            Some(account),
            None,
            amount,
            source.currency,
            description,
        );
        let id = uow.record(record).await?;
        uow.commit().await?;

        info!(transaction = id, account, %amount, "withdrawal completed");
        Ok(id)
    }

    /// Debits a purchase made with a payment instrument (e.g. a card token).
    #[instrument(name = "ledger.pay", skip(self, instrument, description), err)]
    pub async fn pay(
        &self,
        account: AccountId,
        owner: UserId,
        instrument: &str,
        amount: Amount,
        description: Option<String>,
    ) -> Result<TransactionId> {
        if instrument.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "payment instrument is required".to_string(),
            ));
        }
        let source = self.debitable(account, owner, amount).await?;

        let mut uow = self.begin();
        uow.lock_account(account).await?.ensure_active()?;
        uow.mutate_balance(account, amount.debit()).await?;
        let mut record = self.completed_record(
            TransactionType::Payment,
            Some(account),
            None,
            amount,
            source.currency,
            description,
        );
        record.instrument = Some(instrument.to_string());
        let id = uow.record(record).await?;
        uow.notify_after_commit(Notification::new(
            owner,
            NotificationKind::TransactionCompleted,
            json!({
                "transaction": id,
                "type": TransactionType::Payment,
                "account": account,
                "amount": amount,
                "currency": source.currency,
            }),
        ));
        uow.commit().await?;

        info!(transaction = id, account, %amount, "payment completed");
        Ok(id)
    }

    /// Moves `amount` from `source` to `destination` atomically.
    ///
    /// Ownership, activity, currency and funds are checked before the unit of
    /// work opens. The debit is re-validated under the row lock, and any
    /// failure inside the unit of work rolls back both sides.
    #[instrument(name = "ledger.transfer", skip(self, description), err)]
    pub async fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        owner: UserId,
        amount: Amount,
        description: Option<String>,
    ) -> Result<TransactionId> {
        if source == destination {
            return Err(LedgerError::ValidationError(
                "source and destination accounts cannot be the same".to_string(),
            ));
        }
        let from = self.debitable(source, owner, amount).await?;
        let to = self.load_account(destination).await?;
        to.ensure_active()?;
        if from.currency != to.currency {
            return Err(LedgerError::ValidationError(
                "currency mismatch between accounts".to_string(),
            ));
        }

        let mut uow = self.begin();
        for locked in uow.lock_accounts(&[source, destination]).await? {
            locked.ensure_active()?;
        }
        uow.mutate_balance(source, amount.debit()).await?;
        uow.mutate_balance(destination, amount.credit()).await?;
        let record = self.completed_record(
            TransactionType::Transfer,
            Some(source),
            Some(destination),
            amount,
            from.currency,
            description,
        );
        let id = uow.record(record).await?;
        uow.notify_after_commit(Notification::new(
            owner,
            NotificationKind::TransactionCompleted,
            json!({
                "transaction": id,
                "type": TransactionType::Transfer,
                "source": source,
                "destination": destination,
                "amount": amount,
                "currency": from.currency,
            }),
        ));
        uow.commit().await?;

        info!(transaction = id, source, destination, %amount, "transfer completed");
        Ok(id)
    }

    /// Removes an account with a zero balance and no open credit.
    #[instrument(name = "ledger.close_account", skip(self), err)]
    pub async fn close_account(&self, id: AccountId, owner: UserId) -> Result<()> {
        let mut uow = self.begin();
        let account = uow.lock_account(id).await?;
        account.ensure_owned_by(owner)?;
        if account.balance != Balance::ZERO {
            return Err(LedgerError::ValidationError(format!(
                "account {id} still holds a balance of {}",
                account.balance
            )));
        }
        let open_credit = self
            .store
            .credits_by_account(id)
            .await?
            .into_iter()
            .any(|c| !matches!(c.status, CreditStatus::Closed | CreditStatus::Rejected));
        if open_credit {
            return Err(LedgerError::ValidationError(format!(
                "account {id} is referenced by an open credit"
            )));
        }

        uow.remove_account(id)?;
        uow.commit().await?;
        info!(account = id, "account closed");
        Ok(())
    }

    async fn load_account(&self, id: AccountId) -> Result<Account> {
        self.store
            .account(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    /// Pre-checks for any debit: owned, active, and currently funded.
    async fn debitable(&self, id: AccountId, owner: UserId, amount: Amount) -> Result<Account> {
        let account = self.account(id, owner).await?;
        account.ensure_active()?;
        if account.balance.value() < amount.value() {
            return Err(LedgerError::InsufficientFunds {
                account: id,
                balance: account.balance.value(),
                requested: amount.value(),
            });
        }
        Ok(account)
    }
}
