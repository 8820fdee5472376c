//! Webhook delivery worker.
//!
//! Polls due `webhook_deliveries` rows and performs the HTTP attempts.
//! Every attempt is independent: one endpoint failing, timing out or
//! disappearing affects only its own row. Failed attempts are rescheduled
//! with exponential backoff until the attempt budget is spent, after which
//! the row is marked permanently failed; the full history stays queryable
//! through the deliveries endpoint.

use event_bus::consumer_retry::RetryConfig;
use reqwest::header::CONTENT_TYPE;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::webhooks::signature::sign_payload;

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Hard cap on each HTTP attempt
    pub request_timeout: Duration,
    /// Attempt budget and backoff schedule between attempts
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig {
                max_attempts: 5,
                initial_backoff: Duration::from_secs(30),
                max_backoff: Duration::from_secs(3600),
            },
        }
    }
}

/// Outcome of a single HTTP delivery attempt. Success is any 2xx response;
/// everything else (non-2xx, timeout, connect or DNS failure) is a failed
/// attempt, never a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed { status: Option<u16>, error: String },
}

/// Background task driving the delivery attempts.
pub async fn run_delivery_worker(pool: PgPool, config: DeliveryConfig) {
    let client = match reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client, delivery worker not started");
            return;
        }
    };

    tracing::info!(
        timeout_secs = config.request_timeout.as_secs(),
        max_attempts = config.retry.max_attempts,
        "Starting webhook delivery worker"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;

        match process_due_deliveries(&pool, &client, &config).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "processed webhook delivery attempts");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "error processing webhook deliveries");
            }
        }
    }
}

#[derive(Debug, FromRow)]
struct DueDelivery {
    id: Uuid,
    event_type: String,
    url: String,
    payload: String,
    attempts: i32,
    secret: Option<String>,
    subscription_active: Option<bool>,
}

/// Attempt every due delivery once. Returns the number of rows attempted.
pub async fn process_due_deliveries(
    pool: &PgPool,
    client: &reqwest::Client,
    config: &DeliveryConfig,
) -> Result<usize, sqlx::Error> {
    let due = sqlx::query_as::<_, DueDelivery>(
        r#"
        SELECT d.id, d.event_type, d.url, d.payload, d.attempts,
               s.secret, s.active AS subscription_active
        FROM webhook_deliveries d
        LEFT JOIN webhook_subscriptions s ON s.id = d.subscription_id
        WHERE d.status = 'pending' AND d.next_attempt_at <= NOW()
        ORDER BY d.next_attempt_at ASC
        LIMIT 50
        "#,
    )
    .fetch_all(pool)
    .await?;

    let count = due.len();

    for row in due {
        // Subscription deleted or switched off mid-retry: stop trying.
        if row.subscription_active != Some(true) {
            abandon_delivery(pool, row.id, "subscription removed or deactivated").await?;
            continue;
        }

        let outcome = attempt_delivery(
            client,
            &row.url,
            &row.event_type,
            row.secret.as_deref(),
            &row.payload,
        )
        .await;

        record_outcome(pool, &row, outcome, config).await?;
    }

    Ok(count)
}

/// Perform one signed HTTP POST. No database access, so the full header
/// and signing behavior is testable against a local listener.
pub async fn attempt_delivery(
    client: &reqwest::Client,
    url: &str,
    event_type: &str,
    secret: Option<&str>,
    body: &str,
) -> DeliveryOutcome {
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(EVENT_HEADER, event_type);

    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        match sign_payload(secret, body.as_bytes()) {
            Ok(signature) => {
                request = request.header(SIGNATURE_HEADER, signature);
            }
            Err(e) => {
                return DeliveryOutcome::Failed {
                    status: None,
                    error: e.to_string(),
                };
            }
        }
    }

    match request.body(body.to_owned()).send().await {
        Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered {
            status: response.status().as_u16(),
        },
        Ok(response) => DeliveryOutcome::Failed {
            status: Some(response.status().as_u16()),
            error: format!("endpoint returned HTTP {}", response.status().as_u16()),
        },
        Err(e) => DeliveryOutcome::Failed {
            status: None,
            error: e.to_string(),
        },
    }
}

async fn record_outcome(
    pool: &PgPool,
    row: &DueDelivery,
    outcome: DeliveryOutcome,
    config: &DeliveryConfig,
) -> Result<(), sqlx::Error> {
    let attempt = row.attempts + 1;

    match outcome {
        DeliveryOutcome::Delivered { status } => {
            sqlx::query(
                r#"
                UPDATE webhook_deliveries
                SET status = 'delivered',
                    attempts = $2,
                    response_status = $3,
                    last_error = NULL,
                    delivered_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(row.id)
            .bind(attempt)
            .bind(status as i32)
            .execute(pool)
            .await?;

            tracing::info!(
                delivery_id = %row.id,
                event_type = %row.event_type,
                attempt,
                status,
                "Webhook delivered"
            );
        }
        DeliveryOutcome::Failed { status, error } => {
            if attempt >= config.retry.max_attempts as i32 {
                sqlx::query(
                    r#"
                    UPDATE webhook_deliveries
                    SET status = 'failed',
                        attempts = $2,
                        response_status = $3,
                        last_error = $4,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(row.id)
                .bind(attempt)
                .bind(status.map(|s| s as i32))
                .bind(&error)
                .execute(pool)
                .await?;

                tracing::warn!(
                    delivery_id = %row.id,
                    event_type = %row.event_type,
                    attempts = attempt,
                    error = %error,
                    "Webhook delivery abandoned after max attempts"
                );
            } else {
                let backoff = config.retry.backoff_for_attempt(attempt as u32);

                sqlx::query(
                    r#"
                    UPDATE webhook_deliveries
                    SET attempts = $2,
                        response_status = $3,
                        last_error = $4,
                        next_attempt_at = NOW() + ($5 || ' seconds')::interval,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(row.id)
                .bind(attempt)
                .bind(status.map(|s| s as i32))
                .bind(&error)
                .bind(backoff.as_secs().to_string())
                .execute(pool)
                .await?;

                tracing::warn!(
                    delivery_id = %row.id,
                    event_type = %row.event_type,
                    attempt,
                    retry_in_secs = backoff.as_secs(),
                    error = %error,
                    "Webhook delivery failed, retry scheduled"
                );
            }
        }
    }

    Ok(())
}

async fn abandon_delivery(
    pool: &PgPool,
    delivery_id: Uuid,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_deliveries
        SET status = 'failed', last_error = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(delivery_id)
    .bind(error)
    .execute(pool)
    .await?;

    tracing::warn!(delivery_id = %delivery_id, error = %error, "Webhook delivery abandoned");

    Ok(())
}
