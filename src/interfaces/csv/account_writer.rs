use crate::domain::account::{Account, AccountId, AccountType, UserId};
use crate::domain::money::Currency;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow {
    account: AccountId,
    owner: UserId,
    #[serde(rename = "type")]
    account_type: AccountType,
    currency: Currency,
    balance: Decimal,
    active: bool,
}

impl From<Account> for AccountRow {
    fn from(account: Account) -> Self {
        Self {
            account: account.id,
            owner: account.owner,
            account_type: account.account_type,
            currency: account.currency,
            balance: account.balance.value(),
            active: account.active,
        }
    }
}

/// Writes account snapshots as `account,owner,type,currency,balance,active`.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, accounts: impl IntoIterator<Item = Account>) -> Result<()> {
        let mut rows: Vec<AccountRow> = accounts.into_iter().map(AccountRow::from).collect();
        rows.sort_by_key(|r| r.account);
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
