use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::engine;
use crate::error::BillingError;
use crate::ledger::{self, validate_amount};
use crate::models::{
    CompletePaymentRequest, CreatePaymentRequest, FailPaymentRequest, InvoiceStatus, Payment,
    SettlementKind,
};
use crate::numbering::{self, PAYMENT_PREFIX};

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/payments", post(create_payment))
        .route("/api/payments/{id}", get(get_payment))
        .route("/api/payments/{id}/complete", post(complete_payment))
        .route("/api/payments/{id}/fail", post(fail_payment))
        .with_state(pool)
}

/// Record a payment in `pending`. The gateway stub completes or fails it
/// through the endpoints below; only completion touches the ledger.
async fn create_payment(
    State(db): State<PgPool>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), BillingError> {
    validate_amount("amount", req.amount)?;

    let now = Utc::now();
    let mut tx = db.begin().await?;

    let invoice = engine::lock_invoice(&mut tx, req.invoice_id).await?;

    match invoice.status {
        InvoiceStatus::Cancelled => {
            return Err(BillingError::invalid_state(
                "cannot record a payment on a cancelled invoice",
            ));
        }
        InvoiceStatus::Archived => {
            return Err(BillingError::invalid_state(
                "cannot record a payment on an archived invoice",
            ));
        }
        InvoiceStatus::Pending | InvoiceStatus::Overdue | InvoiceStatus::Paid => {}
    }

    // Full when it covers everything still outstanding at creation time.
    let totals = ledger::load_totals(&mut tx, invoice.id).await?;
    let payment_type = if req.amount >= totals.remaining(invoice.total_amount) {
        SettlementKind::Full
    } else {
        SettlementKind::Partial
    };

    let payment_number =
        numbering::next_document_number(&mut tx, PAYMENT_PREFIX, now.date_naive()).await?;

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (payment_number, invoice_id, customer_id, payment_method, amount,
             payment_type, gateway, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&payment_number)
    .bind(invoice.id)
    .bind(invoice.customer_id)
    .bind(&req.payment_method)
    .bind(req.amount)
    .bind(payment_type)
    .bind(&req.gateway)
    .bind(&req.notes)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        payment_number = %payment.payment_number,
        invoice_id = %invoice.id,
        amount = %payment.amount,
        "Payment recorded"
    );

    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, BillingError> {
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await?
        .ok_or(BillingError::NotFound("payment"))?;

    Ok(Json(payment))
}

/// Gateway stub: mark the payment completed and reconcile its invoice.
async fn complete_payment(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompletePaymentRequest>,
) -> Result<Json<Payment>, BillingError> {
    let payment =
        engine::complete_payment(&db, id, req.gateway_transaction_id, Utc::now()).await?;

    Ok(Json(payment))
}

/// Gateway stub: mark the payment failed. Terminal, no ledger effect.
async fn fail_payment(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailPaymentRequest>,
) -> Result<Json<Payment>, BillingError> {
    let payment = engine::fail_payment(&db, id, req.reason, Utc::now()).await?;

    Ok(Json(payment))
}
