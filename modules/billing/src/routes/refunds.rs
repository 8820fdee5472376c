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
    CompleteRefundRequest, CreateRefundRequest, Payment, PaymentStatus, Refund, SettlementKind,
};
use crate::numbering::{self, REFUND_PREFIX};

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/refunds", post(create_refund))
        .route("/api/refunds/{id}", get(get_refund))
        .route("/api/refunds/{id}/complete", post(complete_refund))
        .with_state(pool)
}

/// Record a refund in `pending` against one completed payment.
async fn create_refund(
    State(db): State<PgPool>,
    Json(req): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<Refund>), BillingError> {
    validate_amount("amount", req.amount)?;

    let now = Utc::now();
    let mut tx = db.begin().await?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(req.payment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::NotFound("payment"))?;

    // Lock order is invoice first, then payment, as in the engine.
    engine::lock_invoice(&mut tx, payment.invoice_id).await?;
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(req.payment_id)
        .fetch_one(&mut *tx)
        .await?;

    if payment.status != PaymentStatus::Completed {
        return Err(BillingError::invalid_state(format!(
            "only completed payments can be refunded (payment {} is not)",
            payment.payment_number
        )));
    }

    let already_refunded = ledger::refunded_against_payment(&mut tx, payment.id).await?;
    let refundable = payment.amount - already_refunded;
    if req.amount > refundable {
        return Err(BillingError::validation(format!(
            "refund amount {} exceeds the refundable remainder {} of payment {}",
            req.amount, refundable, payment.payment_number
        )));
    }

    // Full when it brings the payment's completed refunds to its amount.
    let refund_type = if already_refunded + req.amount == payment.amount {
        SettlementKind::Full
    } else {
        SettlementKind::Partial
    };

    let refund_number =
        numbering::next_document_number(&mut tx, REFUND_PREFIX, now.date_naive()).await?;

    let refund = sqlx::query_as::<_, Refund>(
        r#"
        INSERT INTO refunds
            (refund_number, payment_id, invoice_id, customer_id, processed_by,
             amount, refund_type, reason, gateway)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(&refund_number)
    .bind(payment.id)
    .bind(payment.invoice_id)
    .bind(payment.customer_id)
    .bind(req.processed_by)
    .bind(req.amount)
    .bind(refund_type)
    .bind(&req.reason)
    .bind(&payment.gateway)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        refund_id = %refund.id,
        refund_number = %refund.refund_number,
        payment_id = %payment.id,
        amount = %refund.amount,
        "Refund recorded"
    );

    Ok((StatusCode::CREATED, Json(refund)))
}

async fn get_refund(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<Refund>, BillingError> {
    let refund = sqlx::query_as::<_, Refund>("SELECT * FROM refunds WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await?
        .ok_or(BillingError::NotFound("refund"))?;

    Ok(Json(refund))
}

/// Gateway stub: mark the refund completed and reconcile its invoice.
async fn complete_refund(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRefundRequest>,
) -> Result<Json<Refund>, BillingError> {
    let refund = engine::complete_refund(&db, id, req.gateway_refund_id, Utc::now()).await?;

    Ok(Json(refund))
}
