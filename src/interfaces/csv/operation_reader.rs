use crate::application::{CreditService, Ledger};
use crate::domain::account::{AccountId, AccountType, UserId};
use crate::domain::credit::CreditRequest;
use crate::domain::money::{Amount, Currency};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OperationKind {
    Open,
    Deposit,
    Withdraw,
    Transfer,
    Credit,
}

/// One raw row: `op,user,account,target,amount,term,rate`.
#[derive(Debug, Deserialize)]
struct OperationRecord {
    op: OperationKind,
    user: UserId,
    account: Option<AccountId>,
    target: Option<AccountId>,
    amount: Option<Decimal>,
    term: Option<u32>,
    rate: Option<Decimal>,
}

/// A validated operation ready to be replayed against the services.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Opens a checking account with an optional initial balance.
    Open { user: UserId, initial: Decimal },
    Deposit {
        user: UserId,
        account: AccountId,
        amount: Amount,
    },
    Withdraw {
        user: UserId,
        account: AccountId,
        amount: Amount,
    },
    Transfer {
        user: UserId,
        account: AccountId,
        target: AccountId,
        amount: Amount,
    },
    Credit(CreditRequest),
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| LedgerError::ValidationError(format!("missing {column}")))
}

impl TryFrom<OperationRecord> for Operation {
    type Error = LedgerError;

    fn try_from(record: OperationRecord) -> Result<Self> {
        let user = record.user;
        let amount = || -> Result<Amount> { Amount::new(required(record.amount, "amount")?) };
        Ok(match record.op {
            OperationKind::Open => Operation::Open {
                user,
                initial: record.amount.unwrap_or_default(),
            },
            OperationKind::Deposit => Operation::Deposit {
                user,
                account: required(record.account, "account")?,
                amount: amount()?,
            },
            OperationKind::Withdraw => Operation::Withdraw {
                user,
                account: required(record.account, "account")?,
                amount: amount()?,
            },
            OperationKind::Transfer => Operation::Transfer {
                user,
                account: required(record.account, "account")?,
                target: required(record.target, "target")?,
                amount: amount()?,
            },
            OperationKind::Credit => Operation::Credit(CreditRequest {
                user,
                principal: required(record.amount, "amount")?,
                term_months: required(record.term, "term")?,
                rate: record.rate,
            }),
        })
    }
}

impl Operation {
    /// Replays the operation. Accounts opened here use `currency`.
    pub async fn execute(
        self,
        ledger: &Ledger,
        credits: &CreditService,
        currency: Currency,
    ) -> Result<()> {
        match self {
            Operation::Open { user, initial } => {
                ledger
                    .open_account(user, currency, AccountType::Checking, initial)
                    .await?;
            }
            Operation::Deposit {
                user,
                account,
                amount,
            } => {
                ledger.deposit(account, user, amount, None).await?;
            }
            Operation::Withdraw {
                user,
                account,
                amount,
            } => {
                ledger.withdraw(account, user, amount, None).await?;
            }
            Operation::Transfer {
                user,
                account,
                target,
                amount,
            } => {
                ledger.transfer(account, target, user, amount, None).await?;
            }
            Operation::Credit(request) => {
                credits.issue(request).await?;
            }
        }
        Ok(())
    }
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing optional columns may be omitted.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates operations, one result per row.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize::<OperationRecord>()
            .map(|result| result.map_err(LedgerError::from).and_then(Operation::try_from))
    }
}
