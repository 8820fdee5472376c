//! Scheduled sweeps.
//!
//! The overdue sweep moves pending, past-due invoices to `overdue`; the
//! archive sweep retires paid invoices once their `paid_date` falls outside
//! the retention window. Both work through the engine one invoice at a
//! time, so each transition takes the invoice lock and emits its events
//! like any other.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::engine;

pub async fn run_overdue_sweep(pool: PgPool, interval_secs: u64) {
    tracing::info!(interval_secs, "Starting overdue sweep");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_overdue(&pool).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "invoices marked overdue");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "overdue sweep failed");
            }
        }
    }
}

async fn sweep_overdue(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let now = Utc::now();

    let candidates: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM invoices
        WHERE status = 'pending' AND due_date < $1
        "#,
    )
    .bind(now.date_naive())
    .fetch_all(pool)
    .await?;

    let mut count = 0usize;
    for (invoice_id,) in candidates {
        // The engine re-checks eligibility under the lock; a candidate that
        // got paid between the scan and the lock is a no-op.
        match engine::mark_overdue(pool, invoice_id, now).await {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(invoice_id = %invoice_id, error = %e, "failed to mark invoice overdue");
            }
        }
    }

    Ok(count)
}

pub async fn run_archive_sweep(pool: PgPool, interval_secs: u64, retention_days: i64) {
    tracing::info!(interval_secs, retention_days, "Starting archive sweep");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match sweep_archive(&pool, retention_days).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "invoices archived");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "archive sweep failed");
            }
        }
    }
}

async fn sweep_archive(pool: &PgPool, retention_days: i64) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    let retention = ChronoDuration::days(retention_days);
    let cutoff = now - retention;

    let candidates: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM invoices
        WHERE status = 'paid' AND paid_date < $1
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut count = 0usize;
    for (invoice_id,) in candidates {
        match engine::archive_invoice(pool, invoice_id, retention, now).await {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(invoice_id = %invoice_id, error = %e, "failed to archive invoice");
            }
        }
    }

    Ok(count)
}
