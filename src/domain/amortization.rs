//! Level-payment (annuity) amortization.
//!
//! Every component is rounded to cents before it is subtracted from the
//! outstanding principal, so the final period takes exactly what is left and
//! the principal components of a schedule always sum to the loan principal.

use super::money::round_money;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Months, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

/// One period of a generated schedule, before it is persisted as an installment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPayment {
    pub due_date: DateTime<Utc>,
    pub principal: Decimal,
    pub interest: Decimal,
    pub total: Decimal,
}

/// Converts an annual percentage rate into a monthly fraction (12% -> 0.01).
pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
    annual_rate_percent / dec!(12) / dec!(100)
}

/// Level monthly payment for a fixed-rate loan, rounded to cents.
pub fn compute_monthly_payment(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> Result<Decimal> {
    if term_months == 0 {
        return Err(LedgerError::ValidationError(
            "term must be at least one month".to_string(),
        ));
    }
    let n = Decimal::from(term_months);
    let rate = monthly_rate(annual_rate_percent);
    if rate.is_zero() {
        return Ok(round_money(principal / n));
    }

    // principal * r / (1 - (1 + r)^-n)
    let payment = (Decimal::ONE + rate)
        .checked_powu(u64::from(term_months))
        .and_then(|growth| Decimal::ONE.checked_div(growth))
        .and_then(|discount| {
            principal
                .checked_mul(rate)?
                .checked_div(Decimal::ONE - discount)
        })
        .ok_or_else(out_of_range)?;
    Ok(round_money(payment))
}

fn out_of_range() -> LedgerError {
    LedgerError::ValidationError("principal, rate and term are out of range".to_string())
}

/// Builds the full schedule: one payment per month starting on `start_date`.
///
/// Due dates are computed as `start_date + i months` rather than by
/// accumulating, so a loan started on the 31st stays on month-end dates
/// instead of drifting.
pub fn generate_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
    monthly_payment: Decimal,
    start_date: DateTime<Utc>,
) -> Result<Vec<ScheduledPayment>> {
    let rate = monthly_rate(annual_rate_percent);
    let mut remaining = round_money(principal);
    let mut schedule = Vec::with_capacity(term_months as usize);

    for period in 0..term_months {
        let interest = round_money(remaining.checked_mul(rate).ok_or_else(out_of_range)?);
        let principal_part = if period + 1 == term_months {
            remaining
        } else {
            monthly_payment
                .checked_sub(interest)
                .ok_or_else(out_of_range)?
                .min(remaining)
                .max(Decimal::ZERO)
        };
        remaining -= principal_part;
        let total = principal_part
            .checked_add(interest)
            .ok_or_else(out_of_range)?;

        let due_date = start_date
            .checked_add_months(Months::new(period))
            .ok_or_else(|| LedgerError::ValidationError("due date out of range".to_string()))?;

        schedule.push(ScheduledPayment {
            due_date,
            principal: principal_part,
            interest,
            total,
        });
    }

    Ok(schedule)
}
