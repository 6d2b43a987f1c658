use super::account::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TransactionCompleted,
    CreditApproved,
    PaymentReminder,
}

/// An outbound message for a user, released only after the unit of work
/// that produced it has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user: UserId,
    pub kind: NotificationKind,
    pub payload: Value,
}

impl Notification {
    pub fn new(user: UserId, kind: NotificationKind, payload: Value) -> Self {
        Self {
            user,
            kind,
            payload,
        }
    }
}
