use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .with_state(pool)
}

async fn health_live() -> StatusCode {
    StatusCode::OK
}

async fn health_ready(State(db): State<PgPool>) -> Result<Json<Value>, StatusCode> {
    sqlx::query("SELECT 1")
        .fetch_one(&db)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(json!({
        "status": "ready",
        "database": "connected",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
