use super::money::{Balance, Currency};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type AccountId = u64;
pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Checking,
    Savings,
    Credit,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountType::Checking => "CHECKING",
            AccountType::Savings => "SAVINGS",
            AccountType::Credit => "CREDIT",
        };
        f.write_str(name)
    }
}

impl FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CHECKING" => Ok(AccountType::Checking),
            "SAVINGS" => Ok(AccountType::Savings),
            "CREDIT" => Ok(AccountType::Credit),
            other => Err(LedgerError::ValidationError(format!(
                "Invalid account type: {other}"
            ))),
        }
    }
}

/// A customer account holding a non-negative balance.
///
/// The balance is only changed through [`Account::apply_delta`], which the
/// ledger calls while holding the account's row lock.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub currency: Currency,
    pub balance: Balance,
    pub account_type: AccountType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        id: AccountId,
        owner: UserId,
        currency: Currency,
        account_type: AccountType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            currency,
            balance: Balance::ZERO,
            account_type,
            active: true,
            created_at,
        }
    }

    /// Adds a signed delta to the balance, refusing to go below zero.
    pub fn apply_delta(&mut self, delta: Decimal) -> Result<Balance> {
        let next = self
            .balance
            .apply(delta)?
            .ok_or(LedgerError::InsufficientFunds {
                account: self.id,
                balance: self.balance.value(),
                requested: -delta,
            })?;
        self.balance = next;
        Ok(next)
    }

    pub fn ensure_owned_by(&self, user: UserId) -> Result<()> {
        if self.owner != user {
            return Err(LedgerError::AuthorizationError(format!(
                "account {} belongs to another user",
                self.id
            )));
        }
        Ok(())
    }

    pub fn ensure_active(&self) -> Result<()> {
        if !self.active {
            return Err(LedgerError::ValidationError(format!(
                "account {} is inactive",
                self.id
            )));
        }
        Ok(())
    }
}
