use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use crate::error::BillingError;
use crate::models::{ListDeliveriesQuery, WebhookDelivery};

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/webhook-deliveries", get(list_deliveries))
        .with_state(pool)
}

/// The inspectable delivery log: every attempt's outcome, attempt count
/// and next retry time, filterable by provider and status.
async fn list_deliveries(
    State(db): State<PgPool>,
    Query(query): Query<ListDeliveriesQuery>,
) -> Result<Json<Vec<WebhookDelivery>>, BillingError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let deliveries = sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT * FROM webhook_deliveries
        WHERE ($1::uuid IS NULL OR provider_id = $1)
          AND ($2::delivery_status IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(query.provider_id)
    .bind(query.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(&db)
    .await?;

    Ok(Json(deliveries))
}
