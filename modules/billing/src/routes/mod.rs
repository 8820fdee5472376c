pub mod customers;
pub mod deliveries;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod providers;
pub mod refunds;

use axum::Router;
use sqlx::PgPool;

/// The full `/api` surface. Handlers are thin: validate, call the engine
/// or a query, map errors.
pub fn api_router(pool: PgPool) -> Router {
    Router::new()
        .merge(customers::router(pool.clone()))
        .merge(providers::router(pool.clone()))
        .merge(invoices::router(pool.clone()))
        .merge(payments::router(pool.clone()))
        .merge(refunds::router(pool.clone()))
        .merge(deliveries::router(pool))
}
