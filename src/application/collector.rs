use super::ledger::Ledger;
use crate::domain::money::Amount;
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::schedule::{InstallmentId, InstallmentStatus, PenaltyPolicy};
use crate::domain::transaction::TransactionType;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending installments found due.
    pub due: usize,
    pub paid: usize,
    /// Collections refused for insufficient funds.
    pub overdue: usize,
    /// Installments left untouched after an error, retried next sweep.
    pub skipped: usize,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.paid
    }

    pub fn failed(&self) -> usize {
        self.overdue + self.skipped
    }
}

enum Collection {
    Paid,
    Delinquent,
    AlreadyHandled,
}

/// Collects due installments from their credit accounts.
#[derive(Clone)]
pub struct PaymentCollector {
    ledger: Ledger,
    policy: PenaltyPolicy,
}

impl PaymentCollector {
    pub fn new(ledger: Ledger, policy: PenaltyPolicy) -> Self {
        Self { ledger, policy }
    }

    /// One sweep over every pending installment due at or before `now`.
    ///
    /// Installments are processed one after another, each in its own unit
    /// of work. Only a failure to list the due installments fails the sweep.
    #[instrument(name = "collector.run_once", skip(self), fields(now = %now), err)]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let due = self.ledger.store().pending_due(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        for installment in due {
            match self.collect(installment.id, now).await {
                Ok(Collection::Paid) => report.paid += 1,
                Ok(Collection::Delinquent) => report.overdue += 1,
                Ok(Collection::AlreadyHandled) => {}
                Err(e) => {
                    warn!(installment = installment.id, error = %e, "collection failed, skipping");
                    report.skipped += 1;
                }
            }
        }

        info!(
            due = report.due,
            paid = report.paid,
            overdue = report.overdue,
            skipped = report.skipped,
            "sweep finished"
        );
        Ok(report)
    }

    async fn collect(&self, id: InstallmentId, now: DateTime<Utc>) -> Result<Collection> {
        let mut uow = self.ledger.begin();
        let listed = uow
            .installment(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("installment", id))?;
        let credit = uow
            .credit(listed.credit_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("credit", listed.credit_id))?;
        let account = uow.lock_account(credit.account).await?;

        // Re-read under the account lock; a concurrent sweep or a schedule
        // view may have moved it since it was listed.
        let mut installment = uow
            .installment(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("installment", id))?;
        if installment.status != InstallmentStatus::Pending {
            return Ok(Collection::AlreadyHandled);
        }

        installment.refresh_overdue(now, &self.policy);
        let due = installment.amount_due();
        if due.is_zero() {
            installment.mark_paid();
            uow.put_installment(installment);
            uow.commit().await?;
            return Ok(Collection::Paid);
        }

        let amount = Amount::new(due)?;
        match uow.mutate_balance(credit.account, amount.debit()).await {
            Ok(balance) => {
                let record = self.ledger.completed_record(
                    TransactionType::Payment,
                    Some(credit.account),
                    None,
                    amount,
                    account.currency,
                    Some(format!("Credit {} installment {id}", credit.id)),
                );
                let tx_id = uow.record(record).await?;
                installment.mark_paid();
                uow.put_installment(installment);
                uow.commit().await?;

                info!(installment = id, credit = credit.id, transaction = tx_id, %amount, %balance, "installment collected");
                Ok(Collection::Paid)
            }
            Err(e) if e.is_insufficient_funds() => {
                installment.mark_delinquent(&self.policy);
                let penalty = installment.penalty;
                let total = installment.total;
                let due_date = installment.due_date;
                uow.put_installment(installment);

                let mut current = uow
                    .credit(credit.id)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("credit", credit.id))?;
                if current.escalate_overdue() {
                    uow.put_credit(current);
                }
                uow.notify_after_commit(Notification::new(
                    credit.owner,
                    NotificationKind::PaymentReminder,
                    json!({
                        "credit": credit.id,
                        "installment": id,
                        "due_date": due_date,
                        "amount": total,
                        "penalty": penalty,
                        "balance": account.balance,
                    }),
                ));
                uow.commit().await?;

                info!(installment = id, credit = credit.id, %penalty, "insufficient funds, installment overdue");
                Ok(Collection::Delinquent)
            }
            Err(e) => Err(e),
        }
    }

    /// Runs a sweep every `period` until the handle is shut down. The first
    /// sweep starts immediately.
    pub fn spawn(&self, period: Duration) -> CollectorHandle {
        let collector = self.clone();
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let now = collector.ledger.now();
                        if let Err(e) = collector.run_once(now).await {
                            error!(error = %e, "sweep aborted");
                        }
                    }
                }
            }
            info!("payment collector stopped");
        });

        CollectorHandle { shutdown, task }
    }
}

/// Handle to a running periodic collector.
pub struct CollectorHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CollectorHandle {
    /// Stops the loop after the current sweep, if any, and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "payment collector task failed");
        }
    }
}
