use super::account::AccountId;
use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type TransactionId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Fee,
    Interest,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// An immutable record of one balance-affecting event.
///
/// A transfer references both sides; deposits reference only the destination
/// and withdrawals and payments only the source.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub r#type: TransactionType,
    pub source: Option<AccountId>,
    pub destination: Option<AccountId>,
    pub amount: Amount,
    pub currency: Currency,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque reference to the payment instrument (card token) used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn involves(&self, account: AccountId) -> bool {
        self.source == Some(account) || self.destination == Some(account)
    }

    pub fn involves_any(&self, accounts: &HashSet<AccountId>) -> bool {
        [self.source, self.destination]
            .into_iter()
            .flatten()
            .any(|id| accounts.contains(&id))
    }

    /// Whether the record falls within `from..=to`.
    pub fn within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        from <= self.timestamp && self.timestamp <= to
    }
}

/// Orders records newest first, breaking ties by descending id.
pub fn newest_first(records: &mut [TransactionRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transfer_record_involves_both_sides() {
        let record = TransactionRecord {
            id: 1,
            r#type: TransactionType::Transfer,
            source: Some(10),
            destination: Some(20),
            amount: Amount::new(dec!(5.00)).unwrap(),
            currency: Currency::Rub,
            status: TransactionStatus::Completed,
            description: None,
            instrument: None,
            timestamp: Utc::now(),
        };

        assert!(record.involves(10));
        assert!(record.involves(20));
        assert!(!record.involves(30));
        assert!(record.involves_any(&HashSet::from([30, 20])));
        assert!(!record.involves_any(&HashSet::from([30, 40])));
    }

    #[test]
    fn test_newest_first_and_range() {
        let at = |id: TransactionId, hour: u32| TransactionRecord {
            id,
            r#type: TransactionType::Deposit,
            source: None,
            destination: Some(1),
            amount: Amount::new(dec!(1)).unwrap(),
            currency: Currency::Rub,
            status: TransactionStatus::Completed,
            description: None,
            instrument: None,
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, hour, 0, 0).unwrap(),
        };
        let mut records = vec![at(1, 8), at(3, 12), at(2, 12)];
        newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let from = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 1, 11, 0, 0).unwrap();
        assert!(at(1, 8).within(from, to));
        assert!(!at(2, 12).within(from, to));
    }

    #[test]
    fn test_record_serialization_skips_empty_options() {
        let record = TransactionRecord {
            id: 2,
            r#type: TransactionType::Deposit,
            source: None,
            destination: Some(1),
            amount: Amount::new(dec!(1.50)).unwrap(),
            currency: Currency::Usd,
            status: TransactionStatus::Completed,
            description: None,
            instrument: None,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"DEPOSIT\""));
        assert!(!json.contains("instrument"));

        let back: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
