use super::ledger::Ledger;
use crate::config::CreditConfig;
use crate::domain::account::{Account, AccountType, UserId};
use crate::domain::analytics::{CreditAnalytics, CreditOverview};
use crate::domain::credit::{Credit, CreditId, CreditRequest};
use crate::domain::money::Amount;
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::ports::{IdKind, RateSource};
use crate::domain::schedule::{
    Installment, InstallmentId, InstallmentStatus, PenaltyPolicy, Schedule, ScheduleSummary,
};
use crate::domain::transaction::{TransactionId, TransactionType};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Credit issuance and the credit-side view of installments.
#[derive(Clone)]
pub struct CreditService {
    ledger: Ledger,
    rates: Arc<dyn RateSource>,
    config: CreditConfig,
    policy: PenaltyPolicy,
}

impl CreditService {
    pub fn new(
        ledger: Ledger,
        rates: Arc<dyn RateSource>,
        config: CreditConfig,
        policy: PenaltyPolicy,
    ) -> Self {
        Self {
            ledger,
            rates,
            config,
            policy,
        }
    }

    /// The current key rate, or the configured fallback when the source fails.
    pub async fn key_rate(&self) -> Decimal {
        match self.rates.key_rate().await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.config.fallback_key_rate,
                    "key rate unavailable, using fallback"
                );
                self.config.fallback_key_rate
            }
        }
    }

    /// Issues a credit: opens its credit account, stores the credit with its
    /// full schedule and pays the principal out, all in one unit of work.
    #[instrument(
        name = "credit.issue",
        skip(self, request),
        fields(user = request.user, principal = %request.principal, term = request.term_months),
        err
    )]
    pub async fn issue(&self, request: CreditRequest) -> Result<(CreditId, Schedule)> {
        request.validate(&self.config)?;
        let key_rate = self.key_rate().await;
        let rate = request.effective_rate(key_rate, self.config.rate_markup);
        let currency = self.config.currency;
        let now = self.ledger.now();

        let mut uow = self.ledger.begin();
        let account_id = uow.next_id(IdKind::Account).await?;
        uow.insert_account(Account::new(
            account_id,
            request.user,
            currency,
            AccountType::Credit,
            now,
        ))
        .await;

        let credit_id = uow.next_id(IdKind::Credit).await?;
        let credit = Credit::new(
            credit_id,
            request.user,
            account_id,
            request.principal,
            rate,
            request.term_months,
            now,
        )?;

        let payments = credit.schedule()?;
        let mut installments = Vec::with_capacity(payments.len());
        for payment in payments {
            let id = uow.next_id(IdKind::Installment).await?;
            let installment = Installment::new(id, credit_id, payment);
            uow.put_installment(installment.clone());
            installments.push(installment);
        }

        let principal = Amount::new(request.principal)?;
        uow.mutate_balance(account_id, principal.credit()).await?;
        let record = self.ledger.completed_record(
            TransactionType::Deposit,
            None,
            Some(account_id),
            principal,
            currency,
            Some(format!("Credit {credit_id} disbursement")),
        );
        uow.record(record).await?;

        uow.notify_after_commit(Notification::new(
            request.user,
            NotificationKind::CreditApproved,
            json!({
                "credit": credit_id,
                "account": account_id,
                "amount": credit.principal,
                "rate": credit.annual_rate,
                "term_months": credit.term_months,
                "monthly_payment": credit.monthly_payment,
                "end_date": credit.end_date,
            }),
        ));
        let monthly_payment = credit.monthly_payment;
        uow.put_credit(credit);
        uow.commit().await?;

        info!(credit = credit_id, account = account_id, %rate, %monthly_payment, "credit issued");
        Ok((credit_id, Schedule::new(installments)))
    }

    pub async fn credit(&self, id: CreditId, owner: UserId) -> Result<Credit> {
        let credit = self.load_credit(id).await?;
        credit.ensure_owned_by(owner)?;
        Ok(credit)
    }

    pub async fn credits(&self, owner: UserId) -> Result<Vec<Credit>> {
        self.ledger.store().credits_by_owner(owner).await
    }

    /// Debt, interest and arrears across the user's running credits, built
    /// from the stored schedules. A credit whose schedule cannot be read is
    /// left out with a warning.
    #[instrument(name = "credit.analytics", skip(self), err)]
    pub async fn analytics(&self, owner: UserId) -> Result<CreditAnalytics> {
        let credits = self.credits(owner).await?;
        let total_credits = credits.len();

        let mut overviews = Vec::new();
        for credit in credits.into_iter().filter(Credit::is_running) {
            match self.ledger.store().installments_for_credit(credit.id).await {
                Ok(installments) => overviews.push(CreditOverview {
                    summary: ScheduleSummary::from_installments(&installments),
                    credit,
                }),
                Err(e) => warn!(credit = credit.id, error = %e, "schedule unavailable, skipping credit"),
            }
        }

        Ok(CreditAnalytics::new(total_credits, overviews))
    }

    /// A credit's installments ordered by due date, as stored.
    pub async fn for_credit(&self, id: CreditId) -> Result<Vec<Installment>> {
        self.load_credit(id).await?;
        self.ledger.store().installments_for_credit(id).await
    }

    /// The schedule as seen now.
    ///
    /// Pending installments past their due date are re-evaluated and
    /// persisted first, escalating the credit if any of them flipped.
    #[instrument(name = "credit.schedule", skip(self), err)]
    pub async fn schedule(&self, id: CreditId, owner: UserId) -> Result<Schedule> {
        let credit = self.credit(id, owner).await?;
        let now = self.ledger.now();

        let installments = self.ledger.store().installments_for_credit(id).await?;
        let stale = installments
            .iter()
            .any(|i| i.status == InstallmentStatus::Pending && now > i.due_date);
        if !stale {
            return Ok(Schedule::new(installments));
        }

        let mut uow = self.ledger.begin();
        uow.lock_account(credit.account).await?;
        let mut installments = self.ledger.store().installments_for_credit(id).await?;
        let mut flipped = 0usize;
        for installment in &mut installments {
            if installment.refresh_overdue(now, &self.policy) {
                uow.put_installment(installment.clone());
                flipped += 1;
            }
        }
        if flipped > 0 {
            let mut credit = uow
                .credit(id)
                .await?
                .ok_or_else(|| LedgerError::not_found("credit", id))?;
            if credit.escalate_overdue() {
                uow.put_credit(credit);
            }
        }
        uow.commit().await?;

        if flipped > 0 {
            info!(credit = id, flipped, "installments moved to overdue");
        }
        Ok(Schedule::new(installments))
    }

    /// Clears an overdue installment by debiting its total plus penalty from
    /// the credit account.
    ///
    /// Once no overdue installment remains the credit returns to `ACTIVE`.
    #[instrument(name = "credit.repay_overdue", skip(self), err)]
    pub async fn repay_overdue(
        &self,
        installment: InstallmentId,
        owner: UserId,
    ) -> Result<TransactionId> {
        let stored = self
            .ledger
            .store()
            .installment(installment)
            .await?
            .ok_or_else(|| LedgerError::not_found("installment", installment))?;
        let credit = self.credit(stored.credit_id, owner).await?;

        let mut uow = self.ledger.begin();
        let account = uow.lock_account(credit.account).await?;
        let mut target = uow
            .installment(installment)
            .await?
            .ok_or_else(|| LedgerError::not_found("installment", installment))?;
        if target.status != InstallmentStatus::Overdue {
            return Err(LedgerError::ValidationError(format!(
                "installment {installment} is not overdue"
            )));
        }

        let amount = Amount::new(target.amount_due())?;
        uow.mutate_balance(credit.account, amount.debit()).await?;
        let record = self.ledger.completed_record(
            TransactionType::Payment,
            Some(credit.account),
            None,
            amount,
            account.currency,
            Some(format!(
                "Overdue installment {installment} of credit {}",
                credit.id
            )),
        );
        let tx_id = uow.record(record).await?;
        target.mark_paid();
        uow.put_installment(target);

        let still_overdue = self
            .ledger
            .store()
            .installments_for_credit(credit.id)
            .await?
            .iter()
            .any(|i| i.id != installment && i.status == InstallmentStatus::Overdue);
        if !still_overdue {
            let mut current = uow
                .credit(credit.id)
                .await?
                .ok_or_else(|| LedgerError::not_found("credit", credit.id))?;
            if current.reinstate() {
                uow.put_credit(current);
            }
        }
        uow.commit().await?;

        info!(installment, credit = credit.id, transaction = tx_id, %amount, "overdue installment repaid");
        Ok(tx_id)
    }

    /// Closes a credit whose installments are all paid or cancelled.
    #[instrument(name = "credit.close", skip(self), err)]
    pub async fn close(&self, id: CreditId, owner: UserId) -> Result<Credit> {
        let credit = self.credit(id, owner).await?;

        let mut uow = self.ledger.begin();
        uow.lock_account(credit.account).await?;
        let open = self
            .ledger
            .store()
            .installments_for_credit(id)
            .await?
            .iter()
            .filter(|i| !i.is_settled())
            .count();
        if open > 0 {
            return Err(LedgerError::ValidationError(format!(
                "credit {id} still has {open} unsettled installments"
            )));
        }

        let mut current = uow
            .credit(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit", id))?;
        current.close()?;
        uow.put_credit(current.clone());
        uow.commit().await?;

        info!(credit = id, "credit closed");
        Ok(current)
    }

    async fn load_credit(&self, id: CreditId) -> Result<Credit> {
        self.ledger
            .store()
            .credit(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit", id))
    }
}
