use super::amortization::ScheduledPayment;
use super::credit::CreditId;
use super::money::round_money;
use crate::config::CollectionConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type InstallmentId = u64;

/// `PENDING -> {PAID, OVERDUE, CANCELLED}`. Nothing automatic leaves `OVERDUE`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

/// How lateness is penalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyPolicy {
    /// Fraction of the installment total charged once the grace period is over.
    pub rate: Decimal,
    /// Whole days after the due date during which no penalty applies.
    pub grace_days: i64,
}

impl From<&CollectionConfig> for PenaltyPolicy {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            rate: config.penalty_rate,
            grace_days: config.grace_days,
        }
    }
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self::from(&CollectionConfig::default())
    }
}

impl PenaltyPolicy {
    pub fn penalty_for(&self, total: Decimal) -> Decimal {
        round_money(total * self.rate)
    }
}

/// One scheduled due payment of a credit.
///
/// Only `status`, `is_overdue` and `penalty` change after creation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Installment {
    pub id: InstallmentId,
    pub credit_id: CreditId,
    pub due_date: DateTime<Utc>,
    pub principal: Decimal,
    pub interest: Decimal,
    pub total: Decimal,
    pub status: InstallmentStatus,
    pub is_overdue: bool,
    pub penalty: Decimal,
}

impl Installment {
    pub fn new(id: InstallmentId, credit_id: CreditId, payment: ScheduledPayment) -> Self {
        Self {
            id,
            credit_id,
            due_date: payment.due_date,
            principal: payment.principal,
            interest: payment.interest,
            total: payment.total,
            status: InstallmentStatus::Pending,
            is_overdue: false,
            penalty: Decimal::ZERO,
        }
    }

    /// Whole days elapsed since the due date (truncated).
    pub fn days_late(&self, now: DateTime<Utc>) -> i64 {
        (now - self.due_date).num_days()
    }

    /// Re-evaluates a pending installment against the clock.
    ///
    /// The status flips to `OVERDUE` as soon as `now` is past the due date, but
    /// the overdue flag and the penalty are only set once more than
    /// `grace_days` whole days have elapsed. For the first day an installment
    /// can therefore be `OVERDUE` with `is_overdue == false` and no penalty.
    ///
    /// Returns whether the status changed.
    pub fn refresh_overdue(&mut self, now: DateTime<Utc>, policy: &PenaltyPolicy) -> bool {
        if self.status != InstallmentStatus::Pending || now <= self.due_date {
            return false;
        }
        self.status = InstallmentStatus::Overdue;
        if self.days_late(now) > policy.grace_days {
            self.is_overdue = true;
            self.penalty = policy.penalty_for(self.total);
        }
        true
    }

    /// Marks the installment delinquent after a failed collection.
    ///
    /// A penalty already applied is kept as is.
    pub fn mark_delinquent(&mut self, policy: &PenaltyPolicy) {
        self.status = InstallmentStatus::Overdue;
        self.is_overdue = true;
        if self.penalty.is_zero() {
            self.penalty = policy.penalty_for(self.total);
        }
    }

    pub fn mark_paid(&mut self) {
        self.status = InstallmentStatus::Paid;
    }

    /// Principal plus interest, plus the penalty once the installment is flagged overdue.
    pub fn amount_due(&self) -> Decimal {
        if self.is_overdue {
            self.total + self.penalty
        } else {
            self.total
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            InstallmentStatus::Paid | InstallmentStatus::Cancelled
        )
    }
}

/// Aggregates over a credit's schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleSummary {
    pub total_payments: usize,
    pub total_principal: Decimal,
    pub total_interest: Decimal,
    pub total_amount: Decimal,
    pub paid_payments: usize,
    pub paid_principal: Decimal,
    pub paid_interest: Decimal,
    pub paid_amount: Decimal,
    pub remaining_payments: usize,
    pub remaining_principal: Decimal,
    pub remaining_interest: Decimal,
    pub remaining_amount: Decimal,
    pub overdue_payments: usize,
    pub overdue_principal: Decimal,
    pub overdue_interest: Decimal,
    /// Principal plus interest of overdue installments, penalties excluded.
    pub overdue_amount: Decimal,
    pub total_penalties: Decimal,
}

impl ScheduleSummary {
    pub fn from_installments(installments: &[Installment]) -> Self {
        let mut summary = Self {
            total_payments: installments.len(),
            ..Self::default()
        };

        for installment in installments {
            summary.total_principal += installment.principal;
            summary.total_interest += installment.interest;
            summary.total_amount += installment.total;
            summary.total_penalties += installment.penalty;

            match installment.status {
                InstallmentStatus::Paid => {
                    summary.paid_payments += 1;
                    summary.paid_principal += installment.principal;
                    summary.paid_interest += installment.interest;
                    summary.paid_amount += installment.total;
                }
                InstallmentStatus::Pending => {
                    summary.remaining_payments += 1;
                    summary.remaining_principal += installment.principal;
                    summary.remaining_interest += installment.interest;
                    summary.remaining_amount += installment.total;
                }
                InstallmentStatus::Overdue => {
                    summary.overdue_payments += 1;
                    summary.overdue_principal += installment.principal;
                    summary.overdue_interest += installment.interest;
                    summary.overdue_amount += installment.total;
                }
                InstallmentStatus::Cancelled => {}
            }
        }

        summary
    }
}

/// A credit's installments ordered by due date, with their aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub installments: Vec<Installment>,
    pub summary: ScheduleSummary,
}

impl Schedule {
    pub fn new(mut installments: Vec<Installment>) -> Self {
        installments.sort_by_key(|i| (i.due_date, i.id));
        let summary = ScheduleSummary::from_installments(&installments);
        Self {
            installments,
            summary,
        }
    }

    /// Installments paired with their 1-based payment number.
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &Installment)> {
        self.installments.iter().enumerate().map(|(i, inst)| (i + 1, inst))
    }
}
