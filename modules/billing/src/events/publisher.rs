use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::events::outbox::{fetch_unpublished_events, mark_as_published};

/// Background task that relays outbox events to the event bus.
///
/// Polls `events_outbox` for unpublished rows and publishes each envelope
/// on `billing.events.<event_type>`. Rows are only stamped published after
/// a successful publish, so a bus outage just delays delivery.
pub async fn run_publisher_task(db: PgPool, event_bus: Arc<dyn event_bus::EventBus>) {
    tracing::info!("Starting event publisher task");

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut tick_count: u64 = 0;

    loop {
        interval.tick().await;
        tick_count += 1;

        match publish_batch(&db, &event_bus).await {
            Ok(count) if count > 0 => {
                tracing::info!(tick = tick_count, count, "published events from outbox");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(tick = tick_count, error = %e, "error publishing outbox events");
            }
        }
    }
}

async fn publish_batch(
    db: &PgPool,
    event_bus: &Arc<dyn event_bus::EventBus>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let events = fetch_unpublished_events(db, 100).await?;
    let count = events.len();

    for event in events {
        let subject = format!("billing.events.{}", event.event_type);
        let payload = serde_json::to_vec(&event.payload)?;

        event_bus.publish(&subject, payload).await.map_err(|e| {
            tracing::error!(
                event_id = %event.event_id,
                subject = %subject,
                error = %e,
                "Failed to publish event"
            );
            e
        })?;

        mark_as_published(db, event.event_id).await?;

        tracing::debug!(
            event_id = %event.event_id,
            subject = %subject,
            "Event published"
        );
    }

    Ok(count)
}
