use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{
    CreateProviderRequest, CreateWebhookSubscriptionRequest, ServiceProvider, WebhookSubscription,
};
use crate::webhooks::validate_subscription;

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/providers", post(create_provider))
        .route("/api/providers/{id}", get(get_provider))
        .route(
            "/api/providers/{id}/webhooks",
            post(create_subscription).get(list_subscriptions),
        )
        .route("/api/webhooks/{id}", delete(delete_subscription))
        .with_state(pool)
}

async fn create_provider(
    State(db): State<PgPool>,
    Json(req): Json<CreateProviderRequest>,
) -> Result<(StatusCode, Json<ServiceProvider>), BillingError> {
    if req.name.trim().is_empty() {
        return Err(BillingError::validation("provider name must not be empty"));
    }

    let provider = sqlx::query_as::<_, ServiceProvider>(
        r#"
        INSERT INTO service_providers (name, contact_email)
        VALUES ($1, $2)
        RETURNING *
        "#,
    )
    .bind(req.name.trim())
    .bind(&req.contact_email)
    .fetch_one(&db)
    .await?;

    Ok((StatusCode::CREATED, Json(provider)))
}

async fn get_provider(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceProvider>, BillingError> {
    let provider =
        sqlx::query_as::<_, ServiceProvider>("SELECT * FROM service_providers WHERE id = $1")
            .bind(id)
            .fetch_optional(&db)
            .await?
            .ok_or(BillingError::NotFound("provider"))?;

    Ok(Json(provider))
}

/// Subscriptions are validated here, at write time; the dispatcher trusts
/// every stored row.
async fn create_subscription(
    State(db): State<PgPool>,
    Path(provider_id): Path<Uuid>,
    Json(req): Json<CreateWebhookSubscriptionRequest>,
) -> Result<(StatusCode, Json<WebhookSubscription>), BillingError> {
    validate_subscription(&req)?;

    let exists: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM service_providers WHERE id = $1")
            .bind(provider_id)
            .fetch_optional(&db)
            .await?;
    if exists.is_none() {
        return Err(BillingError::NotFound("provider"));
    }

    let subscription = sqlx::query_as::<_, WebhookSubscription>(
        r#"
        INSERT INTO webhook_subscriptions (provider_id, url, secret, active, events)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(provider_id)
    .bind(&req.url)
    .bind(&req.secret)
    .bind(req.active)
    .bind(&req.events)
    .fetch_one(&db)
    .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn list_subscriptions(
    State(db): State<PgPool>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Vec<WebhookSubscription>>, BillingError> {
    let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
        r#"
        SELECT * FROM webhook_subscriptions
        WHERE provider_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(provider_id)
    .fetch_all(&db)
    .await?;

    Ok(Json(subscriptions))
}

async fn delete_subscription(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, BillingError> {
    let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(BillingError::NotFound("webhook subscription"));
    }

    Ok(StatusCode::NO_CONTENT)
}
