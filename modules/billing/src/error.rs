use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};

use crate::models::ErrorResponse;

/// Errors surfaced by the billing engine and its HTTP surface.
///
/// Webhook delivery failures are deliberately absent: they are recorded on
/// the delivery row and retried in the background, never raised into the
/// business transaction that produced the event.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Transition not allowed from the current state (e.g. cancelling a
    /// paid invoice). Always carries a specific message.
    #[error("{0}")]
    InvalidState(String),

    /// Malformed input rejected before any state mutation
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Storage failure; the surrounding transaction has been rolled back
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
}

impl BillingError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            BillingError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            BillingError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            BillingError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            BillingError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Do not leak driver-level detail to API clients
        let message = match &self {
            BillingError::Persistence(e) => {
                tracing::error!(error = %e, "database error");
                "Storage operation failed".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
