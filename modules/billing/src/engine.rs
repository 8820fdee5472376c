//! Invoice reconciliation engine.
//!
//! Status is always derived from the ledger: every operation locks the
//! invoice row (`SELECT ... FOR UPDATE`), recomputes the completed-payment
//! and completed-refund sums inside that transaction, and decides the
//! transition from the recomputed totals, never from the triggering record
//! alone. Two partial payments completing out of order therefore converge
//! on the same final state.
//!
//! The decision layer is pure: it takes the current status, the remaining
//! balance and a caller-supplied `now`, and returns what (if anything)
//! changes. The async operations wrap those decisions in a transaction and
//! enqueue domain events through the outbox before committing, so either
//! everything lands or nothing does.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::BillingError;
use crate::events::emitter::{self, EventKind};
use crate::ledger;
use crate::models::{
    Customer, Invoice, InvoiceStatus, Payment, PaymentStatus, Refund, RefundStatus, SettlementKind,
};

// ============================================================================
// PURE DECISIONS
// ============================================================================

/// Status change produced by a ledger reconciliation decision. Overdue and
/// archive transitions are date-gated booleans, not ledger decisions, and
/// have their own predicates below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Ledger settled; stamp `paid_date`
    MarkPaid,
    /// A refund re-opened a paid invoice; clear `paid_date`
    RevertToPending,
}

/// Decide the status change after a payment completed.
///
/// Settlement means `remaining <= 0`; overpayment counts the same as an
/// exact zero. Already-paid invoices yield no transition, which is what
/// makes replayed reconciliation calls no-ops.
pub fn settle_after_payment(status: InvoiceStatus, remaining: Decimal) -> Option<Transition> {
    match status {
        InvoiceStatus::Pending | InvoiceStatus::Overdue if remaining <= Decimal::ZERO => {
            Some(Transition::MarkPaid)
        }
        _ => None,
    }
}

/// Decide the status change after a refund completed.
///
/// A refund can settle an invoice (the ledger may still cover the total)
/// or re-open a paid one when the remaining balance becomes positive.
pub fn settle_after_refund(status: InvoiceStatus, remaining: Decimal) -> Option<Transition> {
    match status {
        InvoiceStatus::Pending | InvoiceStatus::Overdue if remaining <= Decimal::ZERO => {
            Some(Transition::MarkPaid)
        }
        InvoiceStatus::Paid if remaining > Decimal::ZERO => Some(Transition::RevertToPending),
        _ => None,
    }
}

/// Cancellation is rejected from `paid`, `cancelled` and `archived`.
pub fn cancel_decision(status: InvoiceStatus) -> Result<(), BillingError> {
    match status {
        InvoiceStatus::Paid => Err(BillingError::invalid_state(
            "a paid invoice cannot be cancelled",
        )),
        InvoiceStatus::Cancelled => Err(BillingError::invalid_state(
            "invoice is already cancelled",
        )),
        InvoiceStatus::Archived => Err(BillingError::invalid_state(
            "an archived invoice cannot be cancelled",
        )),
        InvoiceStatus::Pending | InvoiceStatus::Overdue => Ok(()),
    }
}

/// Overdue applies only to pending invoices past their due date; anything
/// else is a no-op, not an error.
pub fn overdue_decision(status: InvoiceStatus, due_date: NaiveDate, today: NaiveDate) -> bool {
    status == InvoiceStatus::Pending && due_date < today
}

/// Archive applies only to paid invoices whose `paid_date` is older than
/// the retention window.
pub fn archive_decision(
    status: InvoiceStatus,
    paid_date: Option<DateTime<Utc>>,
    retention: Duration,
    now: DateTime<Utc>,
) -> bool {
    status == InvoiceStatus::Paid
        && paid_date.map(|paid| now - paid > retention).unwrap_or(false)
}

// ============================================================================
// TRANSACTIONAL OPERATIONS
// ============================================================================

/// Complete a pending payment and reconcile its invoice.
///
/// Idempotent: completing an already-completed payment re-runs
/// reconciliation (a no-op by construction) and returns the payment
/// unchanged.
pub async fn complete_payment(
    pool: &PgPool,
    payment_id: Uuid,
    gateway_transaction_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    let mut tx = pool.begin().await?;

    let payment = load_payment(&mut tx, payment_id).await?;

    // Lock order is invoice first, then payment, everywhere.
    let invoice = lock_invoice(&mut tx, payment.invoice_id).await?;
    let mut payment = lock_payment(&mut tx, payment_id).await?;

    match payment.status {
        PaymentStatus::Pending | PaymentStatus::Processing => {
            payment = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'completed',
                    gateway_transaction_id = COALESCE($2, gateway_transaction_id),
                    processed_at = $3,
                    updated_at = $3
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment_id)
            .bind(gateway_transaction_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let customer = load_customer(&mut tx, invoice.customer_id).await?;
            emitter::emit(
                &mut tx,
                EventKind::PaymentCompleted,
                &invoice,
                Some(&payment),
                &customer,
                now,
            )
            .await?;

            reconcile_after_payment(&mut tx, invoice, &payment, &customer, now).await?;
        }
        PaymentStatus::Completed => {
            // Replay: the ledger already contains this payment, so the
            // reconciliation decision cannot change anything.
            let customer = load_customer(&mut tx, invoice.customer_id).await?;
            reconcile_after_payment(&mut tx, invoice, &payment, &customer, now).await?;
        }
        PaymentStatus::Failed | PaymentStatus::Refunded => {
            return Err(BillingError::invalid_state(format!(
                "payment {} cannot be completed from its current status",
                payment.payment_number
            )));
        }
    }

    tx.commit().await?;
    Ok(payment)
}

/// Mark a pending payment failed. Terminal; the invoice ledger is not
/// touched.
pub async fn fail_payment(
    pool: &PgPool,
    payment_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    let mut tx = pool.begin().await?;

    let payment = load_payment(&mut tx, payment_id).await?;
    let invoice = lock_invoice(&mut tx, payment.invoice_id).await?;
    let mut payment = lock_payment(&mut tx, payment_id).await?;

    match payment.status {
        PaymentStatus::Failed => {
            // Already failed; nothing to do.
        }
        PaymentStatus::Pending | PaymentStatus::Processing => {
            payment = sqlx::query_as::<_, Payment>(
                r#"
                UPDATE payments
                SET status = 'failed',
                    notes = COALESCE($2, notes),
                    updated_at = $3
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(payment_id)
            .bind(reason)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let customer = load_customer(&mut tx, invoice.customer_id).await?;
            emitter::emit(
                &mut tx,
                EventKind::PaymentFailed,
                &invoice,
                Some(&payment),
                &customer,
                now,
            )
            .await?;
        }
        PaymentStatus::Completed | PaymentStatus::Refunded => {
            return Err(BillingError::invalid_state(format!(
                "payment {} has already been processed and cannot fail",
                payment.payment_number
            )));
        }
    }

    tx.commit().await?;
    Ok(payment)
}

/// Complete a pending refund and reconcile its invoice.
///
/// Enforces the over-refund invariant under the invoice lock, marks the
/// parent payment `refunded` for full refunds, and reverts a paid invoice
/// to `pending` (clearing `paid_date`) when the refund re-opens a balance.
pub async fn complete_refund(
    pool: &PgPool,
    refund_id: Uuid,
    gateway_refund_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<Refund, BillingError> {
    let mut tx = pool.begin().await?;

    let refund = load_refund(&mut tx, refund_id).await?;
    let invoice = lock_invoice(&mut tx, refund.invoice_id).await?;
    let payment = lock_payment(&mut tx, refund.payment_id).await?;

    let mut refund = sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = $1 FOR UPDATE")
        .bind(refund_id)
        .fetch_one(&mut *tx)
        .await?;

    match refund.status {
        RefundStatus::Completed => {
            // Replay; ledger already reflects it.
            tx.commit().await?;
            return Ok(refund);
        }
        RefundStatus::Pending | RefundStatus::Processing => {}
        RefundStatus::Failed | RefundStatus::Cancelled => {
            return Err(BillingError::invalid_state(format!(
                "refund {} cannot be completed from its current status",
                refund.refund_number
            )));
        }
    }

    // Completed refunds against a payment must never sum above its amount.
    let already_refunded = ledger::refunded_against_payment(&mut tx, payment.id).await?;
    if already_refunded + refund.amount > payment.amount {
        return Err(BillingError::invalid_state(format!(
            "refund {} would exceed the amount of payment {}",
            refund.refund_number, payment.payment_number
        )));
    }

    refund = sqlx::query_as::<_, Refund>(
        r#"
        UPDATE refunds
        SET status = 'completed',
            gateway_refund_id = COALESCE($2, gateway_refund_id),
            processed_at = $3,
            updated_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(refund_id)
    .bind(gateway_refund_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let payment = if refund.refund_type == SettlementKind::Full {
        sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'refunded', updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?
    } else {
        payment
    };

    let customer = load_customer(&mut tx, invoice.customer_id).await?;
    emitter::emit(
        &mut tx,
        EventKind::RefundCompleted,
        &invoice,
        Some(&payment),
        &customer,
        now,
    )
    .await?;

    let totals = ledger::load_totals(&mut tx, invoice.id).await?;
    let remaining = totals.remaining(invoice.total_amount);

    match settle_after_refund(invoice.status, remaining) {
        Some(Transition::MarkPaid) => {
            let updated = mark_invoice_paid(&mut tx, &invoice, now).await?;
            emitter::emit(&mut tx, EventKind::InvoicePaid, &updated, None, &customer, now).await?;
        }
        Some(Transition::RevertToPending) => {
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = 'pending', paid_date = NULL, updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(invoice.id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tracing::info!(
                invoice_id = %invoice.id,
                invoice_number = %invoice.invoice_number,
                remaining = %remaining,
                "Refund re-opened a paid invoice"
            );
        }
        _ => {}
    }

    tx.commit().await?;
    Ok(refund)
}

/// Cancel an invoice, recording the reason and timestamp in its metadata.
///
/// Fails with an invalid-state error when the invoice is paid, cancelled
/// or archived.
pub async fn cancel_invoice(
    pool: &PgPool,
    invoice_id: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Invoice, BillingError> {
    let mut tx = pool.begin().await?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    cancel_decision(invoice.status)?;

    let patch = serde_json::json!({
        "cancellation_reason": reason,
        "cancelled_at": now,
    });

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'cancelled',
            metadata = metadata || $2::jsonb,
            updated_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(patch)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let customer = load_customer(&mut tx, invoice.customer_id).await?;
    emitter::emit(
        &mut tx,
        EventKind::InvoiceCancelled,
        &invoice,
        None,
        &customer,
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(invoice)
}

/// Move a pending, past-due invoice to `overdue`. Returns whether a
/// transition happened; anything else is a no-op, never an error.
pub async fn mark_overdue(
    pool: &PgPool,
    invoice_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, BillingError> {
    let mut tx = pool.begin().await?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if !overdue_decision(invoice.status, invoice.due_date, now.date_naive()) {
        return Ok(false);
    }

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'overdue', updated_at = $2
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let customer = load_customer(&mut tx, invoice.customer_id).await?;
    emitter::emit(
        &mut tx,
        EventKind::InvoiceOverdue,
        &invoice,
        None,
        &customer,
        now,
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Archive a paid invoice whose `paid_date` is past the retention window.
/// Returns whether a transition happened.
pub async fn archive_invoice(
    pool: &PgPool,
    invoice_id: Uuid,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<bool, BillingError> {
    let mut tx = pool.begin().await?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if !archive_decision(invoice.status, invoice.paid_date, retention, now) {
        return Ok(false);
    }

    sqlx::query(
        r#"
        UPDATE invoices
        SET status = 'archived', updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(invoice_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(invoice_id = %invoice_id, "Invoice archived");
    Ok(true)
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

async fn reconcile_after_payment(
    tx: &mut PgConnection,
    invoice: Invoice,
    payment: &Payment,
    customer: &Customer,
    now: DateTime<Utc>,
) -> Result<(), BillingError> {
    let totals = ledger::load_totals(tx, invoice.id).await?;
    let remaining = totals.remaining(invoice.total_amount);

    if let Some(Transition::MarkPaid) = settle_after_payment(invoice.status, remaining) {
        let updated = mark_invoice_paid(tx, &invoice, now).await?;
        emitter::emit(
            tx,
            EventKind::InvoicePaid,
            &updated,
            Some(payment),
            customer,
            now,
        )
        .await?;
    }

    Ok(())
}

async fn mark_invoice_paid(
    tx: &mut PgConnection,
    invoice: &Invoice,
    now: DateTime<Utc>,
) -> Result<Invoice, sqlx::Error> {
    let updated = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = 'paid', paid_date = $2, updated_at = $2
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(invoice.id)
    .bind(now)
    .fetch_one(tx)
    .await?;

    tracing::info!(
        invoice_id = %updated.id,
        invoice_number = %updated.invoice_number,
        "Invoice settled"
    );

    Ok(updated)
}

/// The per-invoice serialization point: every transition takes this lock,
/// so ledger recomputation and the status write are atomic per invoice.
pub(crate) async fn lock_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Invoice, BillingError> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound("invoice"))
}

async fn lock_payment(conn: &mut PgConnection, payment_id: Uuid) -> Result<Payment, BillingError> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound("payment"))
}

async fn load_payment(conn: &mut PgConnection, payment_id: Uuid) -> Result<Payment, BillingError> {
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound("payment"))
}

async fn load_refund(conn: &mut PgConnection, refund_id: Uuid) -> Result<Refund, BillingError> {
    sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = $1")
        .bind(refund_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound("refund"))
}

pub(crate) async fn load_customer(
    conn: &mut PgConnection,
    customer_id: Uuid,
) -> Result<Customer, BillingError> {
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(customer_id)
        .fetch_optional(conn)
        .await?
        .ok_or(BillingError::NotFound("customer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTotals;
    use rust_decimal_macros::dec;

    fn remaining(total: Decimal, paid: Decimal, refunded: Decimal) -> Decimal {
        LedgerTotals::new(paid, refunded).remaining(total)
    }

    // Scenario A: 100.00 invoice; 60.00 completes, then 40.00.
    #[test]
    fn partial_payments_settle_only_at_full_coverage() {
        let total = dec!(100.00);

        let after_first = remaining(total, dec!(60.00), dec!(0));
        assert_eq!(after_first, dec!(40.00));
        assert_eq!(settle_after_payment(InvoiceStatus::Pending, after_first), None);

        let after_second = remaining(total, dec!(100.00), dec!(0));
        assert_eq!(after_second, dec!(0.00));
        assert_eq!(
            settle_after_payment(InvoiceStatus::Pending, after_second),
            Some(Transition::MarkPaid)
        );
    }

    // Commutativity: P1 then P2 equals P2 then P1.
    #[test]
    fn payment_order_does_not_change_the_outcome() {
        let total = dec!(100.00);
        let p1 = dec!(60.00);
        let p2 = dec!(40.00);

        // P1 first
        assert_eq!(
            settle_after_payment(InvoiceStatus::Pending, remaining(total, p1, dec!(0))),
            None
        );
        let forward = settle_after_payment(InvoiceStatus::Pending, remaining(total, p1 + p2, dec!(0)));

        // P2 first
        assert_eq!(
            settle_after_payment(InvoiceStatus::Pending, remaining(total, p2, dec!(0))),
            None
        );
        let backward = settle_after_payment(InvoiceStatus::Pending, remaining(total, p2 + p1, dec!(0)));

        assert_eq!(forward, backward);
        assert_eq!(forward, Some(Transition::MarkPaid));
    }

    // Idempotence: reconciling an already-paid invoice changes nothing.
    #[test]
    fn reconciling_a_paid_invoice_is_a_no_op() {
        let rem = remaining(dec!(100.00), dec!(100.00), dec!(0));
        assert_eq!(settle_after_payment(InvoiceStatus::Paid, rem), None);
    }

    #[test]
    fn overpayment_settles_like_exact_payment() {
        let rem = remaining(dec!(100.00), dec!(130.00), dec!(0));
        assert_eq!(rem, dec!(-30.00));
        assert_eq!(
            settle_after_payment(InvoiceStatus::Pending, rem),
            Some(Transition::MarkPaid)
        );
    }

    #[test]
    fn overdue_invoice_settles_on_payment() {
        let rem = remaining(dec!(100.00), dec!(100.00), dec!(0));
        assert_eq!(
            settle_after_payment(InvoiceStatus::Overdue, rem),
            Some(Transition::MarkPaid)
        );
    }

    #[test]
    fn cancelled_invoice_never_settles() {
        let rem = remaining(dec!(100.00), dec!(100.00), dec!(0));
        assert_eq!(settle_after_payment(InvoiceStatus::Cancelled, rem), None);
        assert_eq!(settle_after_payment(InvoiceStatus::Archived, rem), None);
    }

    // Scenario B: partial refund re-opens a paid invoice.
    #[test]
    fn partial_refund_reverts_paid_invoice_to_pending() {
        let rem = remaining(dec!(100.00), dec!(100.00), dec!(30.00));
        assert_eq!(rem, dec!(30.00));
        assert_eq!(
            settle_after_refund(InvoiceStatus::Paid, rem),
            Some(Transition::RevertToPending)
        );
    }

    // Round-trip: a full refund of the sole payment re-opens the invoice.
    #[test]
    fn full_refund_round_trip_reverts_to_pending() {
        let rem = remaining(dec!(100.00), dec!(100.00), dec!(100.00));
        assert_eq!(rem, dec!(100.00));
        assert_eq!(
            settle_after_refund(InvoiceStatus::Paid, rem),
            Some(Transition::RevertToPending)
        );
    }

    #[test]
    fn refund_that_leaves_invoice_covered_changes_nothing() {
        // Overpaid by 20, refund of 20: still exactly covered.
        let rem = remaining(dec!(100.00), dec!(120.00), dec!(20.00));
        assert_eq!(rem, dec!(0.00));
        assert_eq!(settle_after_refund(InvoiceStatus::Paid, rem), None);
    }

    #[test]
    fn refund_completion_can_settle_a_pending_invoice() {
        // A refund against another payment completes while the ledger
        // already covers the total: the invoice settles.
        let rem = remaining(dec!(100.00), dec!(150.00), dec!(50.00));
        assert_eq!(rem, dec!(0.00));
        assert_eq!(
            settle_after_refund(InvoiceStatus::Pending, rem),
            Some(Transition::MarkPaid)
        );
    }

    #[test]
    fn cancel_rules() {
        assert!(cancel_decision(InvoiceStatus::Pending).is_ok());
        assert!(cancel_decision(InvoiceStatus::Overdue).is_ok());
        assert!(matches!(
            cancel_decision(InvoiceStatus::Paid),
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            cancel_decision(InvoiceStatus::Cancelled),
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            cancel_decision(InvoiceStatus::Archived),
            Err(BillingError::InvalidState(_))
        ));
    }

    // Scenario C: overdue marking is idempotent and date-gated.
    #[test]
    fn overdue_rules() {
        let due = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let before = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();
        let on_due = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 7, 2).unwrap();

        assert!(!overdue_decision(InvoiceStatus::Pending, due, before));
        assert!(!overdue_decision(InvoiceStatus::Pending, due, on_due));
        assert!(overdue_decision(InvoiceStatus::Pending, due, after));

        // Already overdue (or any other status): no-op
        assert!(!overdue_decision(InvoiceStatus::Overdue, due, after));
        assert!(!overdue_decision(InvoiceStatus::Paid, due, after));
        assert!(!overdue_decision(InvoiceStatus::Cancelled, due, after));
    }

    #[test]
    fn archive_rules() {
        let now = Utc::now();
        let retention = Duration::days(90);

        let old_paid = Some(now - Duration::days(91));
        let recent_paid = Some(now - Duration::days(30));

        assert!(archive_decision(InvoiceStatus::Paid, old_paid, retention, now));
        assert!(!archive_decision(InvoiceStatus::Paid, recent_paid, retention, now));
        assert!(!archive_decision(InvoiceStatus::Paid, None, retention, now));
        assert!(!archive_decision(InvoiceStatus::Pending, old_paid, retention, now));
        assert!(!archive_decision(InvoiceStatus::Archived, old_paid, retention, now));
    }
}
