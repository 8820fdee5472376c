//! Transactional outbox.
//!
//! Events are stored here in the same transaction as the business mutation
//! that produced them; a background publisher relays them to the event bus
//! and stamps `published_at`. If publishing fails the row stays unpublished
//! and is retried on the next tick, which is where the at-least-once
//! guarantee comes from.

use event_bus::EventEnvelope;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Enqueue an event into the outbox within the caller's transaction.
pub async fn enqueue_event<T: Serialize>(
    conn: &mut PgConnection,
    event_type: &str,
    aggregate_type: &str,
    aggregate_id: &str,
    envelope: &EventEnvelope<T>,
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_value(envelope).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO events_outbox
            (event_id, event_type, aggregate_type, aggregate_id, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(envelope.event_id)
    .bind(event_type)
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(payload)
    .bind(envelope.occurred_at)
    .execute(conn)
    .await?;

    tracing::debug!(
        event_id = %envelope.event_id,
        event_type = %event_type,
        "Event enqueued to outbox"
    );

    Ok(())
}

/// Fetch unpublished events in arrival order (used by the publisher task)
pub async fn fetch_unpublished_events(
    db: &PgPool,
    limit: i64,
) -> Result<Vec<UnpublishedEvent>, sqlx::Error> {
    sqlx::query_as::<_, UnpublishedEvent>(
        r#"
        SELECT id, event_id, event_type, aggregate_type, aggregate_id, payload, created_at
        FROM events_outbox
        WHERE published_at IS NULL
        ORDER BY id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await
}

/// Mark an outbox row as published
pub async fn mark_as_published(db: &PgPool, event_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE events_outbox
        SET published_at = NOW()
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .execute(db)
    .await?;

    Ok(())
}

#[derive(Debug, FromRow)]
pub struct UnpublishedEvent {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
