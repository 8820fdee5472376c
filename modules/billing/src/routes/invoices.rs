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
use crate::events::emitter::{self, EventKind};
use crate::ledger::{self, validate_amount, validate_non_negative_amount};
use crate::models::{CancelInvoiceRequest, CreateInvoiceRequest, Invoice, InvoiceWithLedger};
use crate::numbering::{self, INVOICE_PREFIX};

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/invoices", post(create_invoice))
        .route("/api/invoices/{id}", get(get_invoice))
        .route("/api/invoices/{id}/cancel", post(cancel_invoice))
        .with_state(pool)
}

/// Create an invoice (always `pending`) and emit `invoice.created`.
async fn create_invoice(
    State(db): State<PgPool>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), BillingError> {
    validate_amount("amount", req.amount)?;
    validate_non_negative_amount("tax_amount", req.tax_amount)?;

    let now = Utc::now();
    let issue_date = req.issue_date.unwrap_or_else(|| now.date_naive());

    if req.due_date < issue_date {
        return Err(BillingError::validation(
            "due_date must not be before issue_date",
        ));
    }

    let mut tx = db.begin().await?;

    let customer = engine::load_customer(&mut tx, req.customer_id).await?;

    let provider_exists: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM service_providers WHERE id = $1")
            .bind(req.provider_id)
            .fetch_optional(&mut *tx)
            .await?;
    if provider_exists.is_none() {
        return Err(BillingError::NotFound("provider"));
    }

    let invoice_number = numbering::next_document_number(&mut tx, INVOICE_PREFIX, issue_date).await?;

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices
            (invoice_number, customer_id, provider_id, amount, tax_amount,
             issue_date, due_date, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, '{}'::jsonb))
        RETURNING *
        "#,
    )
    .bind(&invoice_number)
    .bind(req.customer_id)
    .bind(req.provider_id)
    .bind(req.amount)
    .bind(req.tax_amount)
    .bind(issue_date)
    .bind(req.due_date)
    .bind(req.metadata)
    .fetch_one(&mut *tx)
    .await?;

    emitter::emit(
        &mut tx,
        EventKind::InvoiceCreated,
        &invoice,
        None,
        &customer,
        now,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        invoice_id = %invoice.id,
        invoice_number = %invoice.invoice_number,
        total = %invoice.total_amount,
        "Invoice created"
    );

    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Fetch an invoice with its derived ledger totals.
async fn get_invoice(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceWithLedger>, BillingError> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await?
        .ok_or(BillingError::NotFound("invoice"))?;

    let mut conn = db.acquire().await?;
    let totals = ledger::load_totals(&mut conn, invoice.id).await?;
    let ledger = totals.view(invoice.total_amount);

    Ok(Json(InvoiceWithLedger { invoice, ledger }))
}

async fn cancel_invoice(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelInvoiceRequest>,
) -> Result<Json<Invoice>, BillingError> {
    let invoice = engine::cancel_invoice(&db, id, req.reason, Utc::now()).await?;

    tracing::info!(
        invoice_id = %invoice.id,
        invoice_number = %invoice.invoice_number,
        "Invoice cancelled"
    );

    Ok(Json(invoice))
}
