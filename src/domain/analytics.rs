//! A user's credit portfolio at a glance.

use super::credit::Credit;
use super::schedule::ScheduleSummary;
use rust_decimal::Decimal;
use serde::Serialize;

/// One running credit together with its schedule aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditOverview {
    pub credit: Credit,
    pub summary: ScheduleSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreditAnalytics {
    /// Every credit the user holds, whatever its status.
    pub total_credits: usize,
    /// Credits that are `ACTIVE` or `OVERDUE`; only these are aggregated below.
    pub active_credits: usize,
    /// Principal and interest still scheduled as pending.
    pub total_debt: Decimal,
    pub total_paid_interest: Decimal,
    /// Overdue principal and interest plus every penalty charged.
    pub total_overdue_payments: Decimal,
    pub total_monthly_payment: Decimal,
    pub credits: Vec<CreditOverview>,
}

impl CreditAnalytics {
    pub fn new(total_credits: usize, overviews: Vec<CreditOverview>) -> Self {
        let mut analytics = Self {
            total_credits,
            ..Self::default()
        };

        for overview in overviews {
            if !overview.credit.is_running() {
                continue;
            }
            let summary = &overview.summary;
            analytics.total_debt += summary.remaining_principal + summary.remaining_interest;
            analytics.total_paid_interest += summary.paid_interest;
            analytics.total_overdue_payments += summary.overdue_amount + summary.total_penalties;
            analytics.total_monthly_payment += overview.credit.monthly_payment;
            analytics.credits.push(overview);
        }
        analytics.active_credits = analytics.credits.len();

        analytics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credit::CreditStatus;
    use crate::domain::schedule::{Installment, PenaltyPolicy};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn overview(id: u64, status: CreditStatus) -> CreditOverview {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mut credit = Credit::new(id, 1, id + 10, dec!(1200), dec!(12), 3, start).unwrap();
        credit.status = status;

        let mut installments: Vec<_> = credit
            .schedule()
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, payment)| Installment::new(i as u64 + 1, id, payment))
            .collect();
        installments[0].mark_paid();
        installments[1].mark_delinquent(&PenaltyPolicy::default());
        let summary = ScheduleSummary::from_installments(&installments);

        CreditOverview { credit, summary }
    }

    #[test]
    fn test_aggregates_only_running_credits() {
        let running = overview(1, CreditStatus::Active);
        let overdue = overview(2, CreditStatus::Overdue);
        let closed = overview(3, CreditStatus::Closed);
        let summary = running.summary.clone();
        assert_eq!(summary.remaining_payments, 1);
        assert_eq!(summary.overdue_payments, 1);

        let analytics = CreditAnalytics::new(3, vec![running.clone(), overdue, closed]);

        assert_eq!(analytics.total_credits, 3);
        assert_eq!(analytics.active_credits, 2);
        assert_eq!(analytics.credits.len(), 2);
        assert_eq!(
            analytics.total_debt,
            (summary.remaining_principal + summary.remaining_interest) * dec!(2)
        );
        assert_eq!(analytics.total_paid_interest, summary.paid_interest * dec!(2));
        assert_eq!(
            analytics.total_overdue_payments,
            (summary.overdue_amount + summary.total_penalties) * dec!(2)
        );
        assert_eq!(
            analytics.total_monthly_payment,
            running.credit.monthly_payment * dec!(2)
        );
    }

    #[test]
    fn test_empty_portfolio() {
        let analytics = CreditAnalytics::new(0, Vec::new());
        assert_eq!(analytics.active_credits, 0);
        assert_eq!(analytics.total_debt, Decimal::ZERO);
        assert!(analytics.credits.is_empty());
    }
}
