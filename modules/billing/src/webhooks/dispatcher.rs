//! Webhook dispatcher.
//!
//! Consumes domain events from the bus and fans each one out into
//! `webhook_deliveries` rows, one per matching active subscription of the
//! issuing provider. The actual HTTP work happens in the delivery worker;
//! this consumer only records what must be delivered, so a slow subscriber
//! endpoint can never back-pressure event processing.

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::events::emitter::DomainEvent;
use crate::events::{dlq, is_event_processed, mark_event_processed};
use crate::models::WebhookSubscription;
use crate::webhooks::subscription::matching_subscriptions;

const PROCESSOR: &str = "webhook-dispatcher";

/// Start the dispatcher consumer task.
pub async fn start_webhook_dispatcher(bus: Arc<dyn EventBus>, pool: PgPool) {
    tokio::spawn(async move {
        tracing::info!("Starting webhook dispatcher");

        let subject = "billing.events.>";
        let mut stream = match bus.subscribe(subject).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to subscribe to {}: {}", subject, e);
                return;
            }
        };

        tracing::info!("Subscribed to {}", subject);

        let retry_config = RetryConfig::default();

        while let Some(msg) = stream.next().await {
            let event_id = match extract_event_id(&msg) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(
                        subject = %msg.subject,
                        error = %e,
                        "Discarding event with malformed envelope"
                    );
                    continue;
                }
            };

            let span = tracing::info_span!(
                "dispatch_event",
                event_id = %event_id,
                subject = %msg.subject,
            );

            async {
                let pool_clone = pool.clone();
                let msg_clone = msg.clone();

                let result = retry_with_backoff(
                    || {
                        let pool = pool_clone.clone();
                        let msg = msg_clone.clone();
                        async move {
                            process_event(&pool, &msg)
                                .await
                                .map_err(|e| e.to_string())
                        }
                    },
                    &retry_config,
                    "webhook_dispatcher",
                )
                .await;

                if let Err(error_msg) = result {
                    tracing::error!(
                        error = %error_msg,
                        retry_count = retry_config.max_attempts,
                        "Event dispatch failed after retries, sending to DLQ"
                    );

                    if let Ok(envelope) = serde_json::from_slice(&msg.payload) {
                        let _ = dlq::insert_failed_event(
                            &pool,
                            event_id,
                            &msg.subject,
                            &envelope,
                            &error_msg,
                            retry_config.max_attempts as i32,
                        )
                        .await;
                    }
                }
            }
            .instrument(span)
            .await;
        }

        tracing::warn!("Webhook dispatcher stopped");
    });
}

async fn process_event(pool: &PgPool, msg: &BusMessage) -> Result<(), Box<dyn std::error::Error>> {
    let envelope: serde_json::Value = serde_json::from_slice(&msg.payload)?;

    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing event_id")?;
    let event_id = Uuid::parse_str(event_id)?;

    if is_event_processed(pool, event_id).await? {
        tracing::debug!(event_id = %event_id, "Duplicate event ignored (already dispatched)");
        return Ok(());
    }

    let event: DomainEvent =
        serde_json::from_value(envelope.get("payload").ok_or("Missing payload")?.clone())?;

    let inserted = fan_out(pool, event_id, &event).await?;

    mark_event_processed(pool, event_id, &event.event, PROCESSOR).await?;

    tracing::info!(
        event_id = %event_id,
        event_type = %event.event,
        deliveries = inserted,
        "Event fanned out to webhook deliveries"
    );

    Ok(())
}

/// Insert one pending delivery per matching subscription. The body is
/// serialized once here; retries sign and send exactly these bytes.
async fn fan_out(
    pool: &PgPool,
    event_id: Uuid,
    event: &DomainEvent,
) -> Result<usize, Box<dyn std::error::Error>> {
    let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
        r#"
        SELECT id, provider_id, url, secret, active, events, created_at
        FROM webhook_subscriptions
        WHERE provider_id = $1 AND active = TRUE
        "#,
    )
    .bind(event.invoice.provider_id)
    .fetch_all(pool)
    .await?;

    let matched = matching_subscriptions(&subscriptions, &event.event);
    if matched.is_empty() {
        return Ok(0);
    }

    let body = serde_json::to_string(event)?;
    let mut inserted = 0usize;

    for subscription in matched {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_deliveries
                (event_id, subscription_id, provider_id, event_type, url, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id, subscription_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(subscription.id)
        .bind(subscription.provider_id)
        .bind(&event.event)
        .bind(&subscription.url)
        .bind(&body)
        .execute(pool)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

fn extract_event_id(msg: &BusMessage) -> Result<Uuid, Box<dyn std::error::Error>> {
    let envelope: serde_json::Value = serde_json::from_slice(&msg.payload)?;
    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing event_id")?;
    Ok(Uuid::parse_str(event_id)?)
}
