//! Ledger aggregation: the derived totals an invoice's status is computed
//! from.
//!
//! All monetary arithmetic runs on `rust_decimal::Decimal` (2-digit scale
//! in storage); comparisons against zero are exact, never epsilon-based.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::LedgerView;

/// Sums of completed payments and completed refunds for one invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    pub total_paid: Decimal,
    pub total_refunded: Decimal,
}

impl LedgerTotals {
    pub fn new(total_paid: Decimal, total_refunded: Decimal) -> Self {
        Self {
            total_paid,
            total_refunded,
        }
    }

    pub fn net_paid(&self) -> Decimal {
        self.total_paid - self.total_refunded
    }

    pub fn remaining(&self, total_amount: Decimal) -> Decimal {
        total_amount - self.net_paid()
    }

    /// An invoice is settled when nothing remains to pay. Overpayment
    /// (negative remaining) counts the same as exact zero.
    pub fn is_settled(&self, total_amount: Decimal) -> bool {
        self.remaining(total_amount) <= Decimal::ZERO
    }

    pub fn view(&self, total_amount: Decimal) -> LedgerView {
        LedgerView {
            total_paid: self.total_paid,
            total_refunded: self.total_refunded,
            net_paid: self.net_paid(),
            remaining: self.remaining(total_amount),
        }
    }
}

/// Load the ledger totals for an invoice.
///
/// Must be called inside the transaction that holds the invoice row lock,
/// so the sums and the status decision see the same snapshot.
pub async fn load_totals(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<LedgerTotals, sqlx::Error> {
    let total_paid: Decimal = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM payments
        WHERE invoice_id = $1 AND status = 'completed'
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;

    let total_refunded: Decimal = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM refunds
        WHERE invoice_id = $1 AND status = 'completed'
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(LedgerTotals::new(total_paid, total_refunded))
}

/// Sum of completed refunds against one payment (for the over-refund check)
pub async fn refunded_against_payment(
    conn: &mut PgConnection,
    payment_id: Uuid,
) -> Result<Decimal, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM refunds
        WHERE payment_id = $1 AND status = 'completed'
        "#,
    )
    .bind(payment_id)
    .fetch_one(&mut *conn)
    .await
}

/// Reject amounts that are not positive or carry more than two fractional
/// digits.
pub fn validate_amount(field: &str, amount: Decimal) -> Result<(), BillingError> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::validation(format!(
            "{field} must be positive"
        )));
    }
    if amount.round_dp(2) != amount {
        return Err(BillingError::validation(format!(
            "{field} must have at most two decimal places"
        )));
    }
    Ok(())
}

/// Like [`validate_amount`] but zero is allowed (tax may be zero).
pub fn validate_non_negative_amount(field: &str, amount: Decimal) -> Result<(), BillingError> {
    if amount < Decimal::ZERO {
        return Err(BillingError::validation(format!(
            "{field} must not be negative"
        )));
    }
    if amount.round_dp(2) != amount {
        return Err(BillingError::validation(format!(
            "{field} must have at most two decimal places"
        )));
    }
    Ok(())
}
