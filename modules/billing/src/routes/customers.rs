use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::{CreateCustomerRequest, Customer};

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/customers", post(create_customer))
        .route("/api/customers/{id}", get(get_customer))
        .with_state(pool)
}

async fn create_customer(
    State(db): State<PgPool>,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), BillingError> {
    if req.name.trim().is_empty() {
        return Err(BillingError::validation("customer name must not be empty"));
    }
    if !req.email.contains('@') {
        return Err(BillingError::validation("customer email is not valid"));
    }

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (name, email)
        VALUES ($1, $2)
        RETURNING *
        "#,
    )
    .bind(req.name.trim())
    .bind(&req.email)
    .fetch_one(&db)
    .await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(db): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, BillingError> {
    let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await?
        .ok_or(BillingError::NotFound("customer"))?;

    Ok(Json(customer))
}
