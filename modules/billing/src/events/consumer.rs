use sqlx::PgPool;
use uuid::Uuid;

/// Check whether an event has already been processed by a consumer.
///
/// The bus is at-least-once, so every consumer dedupes on `event_id`
/// before acting.
pub async fn is_event_processed(db: &PgPool, event_id: Uuid) -> Result<bool, sqlx::Error> {
    let result: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) as count
        FROM processed_events
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .fetch_one(db)
    .await?;

    Ok(result.0 > 0)
}

/// Record an event as processed so replays become no-ops.
pub async fn mark_event_processed(
    db: &PgPool,
    event_id: Uuid,
    event_type: &str,
    processor: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO processed_events (event_id, event_type, processor)
        VALUES ($1, $2, $3)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_type)
    .bind(processor)
    .execute(db)
    .await?;

    tracing::debug!(
        event_id = %event_id,
        event_type = %event_type,
        processor = %processor,
        "Event marked as processed"
    );

    Ok(())
}
