mod common;

use chrono::{Months, TimeDelta};
use common::{harness, start};
use credit_ledger::domain::credit::{CreditRequest, CreditStatus};
use credit_ledger::domain::money::{Amount, Balance};
use credit_ledger::domain::notification::NotificationKind;
use credit_ledger::domain::schedule::InstallmentStatus;
use credit_ledger::domain::transaction::TransactionType;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn request(principal: Decimal, term_months: u32) -> CreditRequest {
    CreditRequest {
        user: 1,
        principal,
        term_months,
        rate: Some(dec!(12)),
    }
}

#[tokio::test]
async fn test_schedule_principal_sums_to_credit_principal() {
    let h = harness();
    for (principal, term) in [
        (dec!(100000), 12),
        (dec!(999.99), 7),
        (dec!(1234567.89), 360),
        (dec!(0.05), 3),
    ] {
        let (_, schedule) = h.credits.issue(request(principal, term)).await.unwrap();
        assert_eq!(schedule.installments.len(), term as usize);
        assert_eq!(schedule.summary.total_principal, principal);
        let last = schedule.installments.last().unwrap();
        assert!(last.principal >= Decimal::ZERO);
    }
}

#[tokio::test]
async fn test_full_lifecycle_pays_every_installment() {
    let h = harness();
    let (credit_id, schedule) = h.credits.issue(request(dec!(1200), 12)).await.unwrap();
    let credit = h.credits.credit(credit_id, 1).await.unwrap();

    // Fund the credit account with enough to cover the interest on top of
    // the disbursed principal.
    h.ledger
        .deposit(credit.account, 1, Amount::new(dec!(100)).unwrap(), None)
        .await
        .unwrap();

    for month in 0..12u32 {
        let now = start().checked_add_months(Months::new(month)).unwrap();
        let report = h.collector.run_once(now).await.unwrap();
        assert_eq!(report.paid, 1, "month {month}");
    }

    let installments = h.credits.for_credit(credit_id).await.unwrap();
    assert!(installments.iter().all(|i| i.status == InstallmentStatus::Paid));

    let paid: Decimal = schedule.installments.iter().map(|i| i.total).sum();
    let account = h.ledger.account(credit.account, 1).await.unwrap();
    assert_eq!(account.balance, Balance::new(dec!(1300) - paid));

    let payments = h
        .ledger
        .transactions(credit.account, 1)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.r#type == TransactionType::Payment)
        .count();
    assert_eq!(payments, 12);

    let closed = h.credits.close(credit_id, 1).await.unwrap();
    assert_eq!(closed.status, CreditStatus::Closed);
}

#[tokio::test]
async fn test_repeated_sweeps_collect_once() {
    let h = harness();
    let (credit_id, _) = h.credits.issue(request(dec!(1200), 12)).await.unwrap();
    let credit = h.credits.credit(credit_id, 1).await.unwrap();

    let at = start() + TimeDelta::hours(1);
    let (first, second, third) = tokio::join!(
        h.collector.run_once(at),
        h.collector.run_once(at),
        h.collector.run_once(at),
    );
    let paid = first.unwrap().paid + second.unwrap().paid + third.unwrap().paid;
    assert_eq!(paid, 1);
    assert_eq!(h.collector.run_once(at).await.unwrap().due, 0);

    let payments = h
        .ledger
        .transactions(credit.account, 1)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.r#type == TransactionType::Payment)
        .count();
    assert_eq!(payments, 1);
}

#[tokio::test]
async fn test_insufficient_funds_escalates_without_touching_balance() {
    let mut h = harness();
    let (credit_id, schedule) = h.credits.issue(request(dec!(1200), 12)).await.unwrap();
    let credit = h.credits.credit(credit_id, 1).await.unwrap();
    let _approved = h.notifications.recv().await.unwrap();

    // The borrower spends the disbursement before the first collection.
    h.ledger
        .withdraw(credit.account, 1, Amount::new(dec!(1150)).unwrap(), None)
        .await
        .unwrap();

    let report = h.collector.run_once(start()).await.unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.processed(), 0);

    let first = h.credits.for_credit(credit_id).await.unwrap()[0].clone();
    assert_eq!(first.id, schedule.installments[0].id);
    assert_eq!(first.status, InstallmentStatus::Overdue);
    assert!(first.is_overdue);
    assert_eq!(first.penalty, (first.total * dec!(0.10)).round_dp(2));

    assert_eq!(
        h.credits.credit(credit_id, 1).await.unwrap().status,
        CreditStatus::Overdue
    );
    assert_eq!(
        h.ledger.account(credit.account, 1).await.unwrap().balance,
        Balance::new(dec!(50))
    );

    let reminder = h.notifications.recv().await.unwrap();
    assert_eq!(reminder.kind, NotificationKind::PaymentReminder);

    // The first installment is not retried; the second one fails on its own.
    let next = start().checked_add_months(Months::new(1)).unwrap();
    let report = h.collector.run_once(next).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.overdue, 1);
    let second = h.credits.for_credit(credit_id).await.unwrap()[1].clone();
    assert_eq!(second.status, InstallmentStatus::Overdue);

    // Repaying every overdue installment clears the credit's overdue state.
    h.ledger
        .deposit(credit.account, 1, Amount::new(dec!(500)).unwrap(), None)
        .await
        .unwrap();
    h.credits.repay_overdue(first.id, 1).await.unwrap();
    assert_eq!(
        h.credits.credit(credit_id, 1).await.unwrap().status,
        CreditStatus::Overdue
    );
    h.credits.repay_overdue(second.id, 1).await.unwrap();
    assert_eq!(
        h.credits.credit(credit_id, 1).await.unwrap().status,
        CreditStatus::Active
    );
    assert_eq!(
        h.ledger.account(credit.account, 1).await.unwrap().balance,
        Balance::new(dec!(550) - first.amount_due() - second.amount_due())
    );
}

#[tokio::test]
async fn test_grace_period_quirk_on_schedule_view() {
    let h = harness();
    let (credit_id, _) = h.credits.issue(request(dec!(1200), 12)).await.unwrap();

    h.clock.set(start() + TimeDelta::days(1) + TimeDelta::hours(2));
    let schedule = h.credits.schedule(credit_id, 1).await.unwrap();
    let first = &schedule.installments[0];
    assert_eq!(first.status, InstallmentStatus::Overdue);
    assert!(!first.is_overdue);
    assert_eq!(first.penalty, Decimal::ZERO);

    // Already flipped, so later views do not add a penalty either.
    h.clock.set(start() + TimeDelta::days(5));
    let schedule = h.credits.schedule(credit_id, 1).await.unwrap();
    assert_eq!(schedule.installments[0].penalty, Decimal::ZERO);
    assert_eq!(schedule.summary.overdue_payments, 1);
}
