use super::account::{AccountId, UserId};
use super::amortization::{ScheduledPayment, compute_monthly_payment, generate_schedule};
use super::money::MONEY_SCALE;
use crate::config::CreditConfig;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type CreditId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum CreditStatus {
    Active,
    Closed,
    Overdue,
    Rejected,
}

/// An amortizing consumer loan.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Credit {
    pub id: CreditId,
    pub owner: UserId,
    /// The credit account the principal is paid into and installments are collected from.
    pub account: AccountId,
    pub principal: Decimal,
    /// Annual interest rate in percent.
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub monthly_payment: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: CreditStatus,
}

impl Credit {
    pub fn new(
        id: CreditId,
        owner: UserId,
        account: AccountId,
        principal: Decimal,
        annual_rate: Decimal,
        term_months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Self> {
        let monthly_payment = compute_monthly_payment(principal, annual_rate, term_months)?;
        let end_date = start_date
            .checked_add_months(Months::new(term_months))
            .ok_or_else(|| LedgerError::ValidationError("credit end date out of range".to_string()))?;

        Ok(Self {
            id,
            owner,
            account,
            principal,
            annual_rate,
            term_months,
            monthly_payment,
            start_date,
            end_date,
            status: CreditStatus::Active,
        })
    }

    /// Amortization schedule for this credit.
    pub fn schedule(&self) -> Result<Vec<ScheduledPayment>> {
        generate_schedule(
            self.principal,
            self.annual_rate,
            self.term_months,
            self.monthly_payment,
            self.start_date,
        )
    }

    /// Moves the credit to `OVERDUE`. Returns whether the status changed.
    ///
    /// Closed and rejected credits are never reopened by a late installment.
    pub fn escalate_overdue(&mut self) -> bool {
        match self.status {
            CreditStatus::Active => {
                self.status = CreditStatus::Overdue;
                true
            }
            CreditStatus::Overdue | CreditStatus::Closed | CreditStatus::Rejected => false,
        }
    }

    /// Returns an overdue credit to `ACTIVE` after its arrears were repaid manually.
    pub fn reinstate(&mut self) -> bool {
        if self.status == CreditStatus::Overdue {
            self.status = CreditStatus::Active;
            return true;
        }
        false
    }

    /// Whether the credit is still being repaid.
    pub fn is_running(&self) -> bool {
        matches!(self.status, CreditStatus::Active | CreditStatus::Overdue)
    }

    /// Closes the credit. Only active or overdue credits can be closed.
    pub fn close(&mut self) -> Result<()> {
        match self.status {
            CreditStatus::Active | CreditStatus::Overdue => {
                self.status = CreditStatus::Closed;
                Ok(())
            }
            CreditStatus::Closed | CreditStatus::Rejected => Err(LedgerError::ValidationError(
                format!("credit {} is already {:?}", self.id, self.status).to_lowercase(),
            )),
        }
    }

    pub fn ensure_owned_by(&self, user: UserId) -> Result<()> {
        if self.owner != user {
            return Err(LedgerError::AuthorizationError(format!(
                "credit {} belongs to another user",
                self.id
            )));
        }
        Ok(())
    }
}

/// An application for a new credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub user: UserId,
    pub principal: Decimal,
    pub term_months: u32,
    /// Explicit annual rate; when absent the key rate plus the configured markup applies.
    #[serde(default)]
    pub rate: Option<Decimal>,
}

impl CreditRequest {
    pub fn validate(&self, config: &CreditConfig) -> Result<()> {
        if self.principal <= Decimal::ZERO {
            return Err(LedgerError::ValidationError(
                "amount must be positive".to_string(),
            ));
        }
        if self.principal.normalize().scale() > MONEY_SCALE {
            return Err(LedgerError::ValidationError(format!(
                "amount must have at most {MONEY_SCALE} decimal places"
            )));
        }
        if self.term_months < config.min_term_months || self.term_months > config.max_term_months
        {
            return Err(LedgerError::ValidationError(format!(
                "term must be between {} and {} months",
                config.min_term_months, config.max_term_months
            )));
        }
        if let Some(rate) = self.rate
            && rate < Decimal::ZERO
        {
            return Err(LedgerError::ValidationError(
                "interest rate cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// The explicit rate if one was requested, otherwise `key_rate + markup`.
    pub fn effective_rate(&self, key_rate: Decimal, markup: Decimal) -> Decimal {
        match self.rate {
            Some(rate) if !rate.is_zero() => rate,
            _ => key_rate + markup,
        }
    }
}
