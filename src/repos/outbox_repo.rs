use crate::models::OutboxEvent;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, processed, created_at";

/// Enqueue an event into the transactional outbox
///
/// Runs inside the same transaction as the domain write it mirrors; the two
/// commit or roll back together.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: &JsonValue,
) -> Result<OutboxEvent, sqlx::Error> {
    sqlx::query_as::<_, OutboxEvent>(&format!(
        r#"
        INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, payload)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await
}

/// Unprocessed payment events that are due, oldest first
///
/// The per-payment backoff gates execution at the query level: an event
/// whose payment is waiting out `next_retry_at` is not handed to the worker
/// even though the poll runs every few seconds.
pub async fn fetch_due_payment_events(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    sqlx::query_as::<_, OutboxEvent>(
        r#"
        SELECT o.id, o.aggregate_type, o.aggregate_id, o.event_type, o.payload,
               o.processed, o.created_at
        FROM outbox_events o
        JOIN payments p ON p.id = o.aggregate_id
        WHERE o.processed = FALSE
          AND o.aggregate_type = 'PAYMENT'
          AND (p.next_retry_at IS NULL OR p.next_retry_at <= NOW())
        ORDER BY o.created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Mark a single outbox row processed
pub async fn mark_processed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE outbox_events
        SET processed = TRUE
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Mark every unprocessed event of an aggregate processed (webhook path)
pub async fn mark_processed_for_aggregate(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_events
        SET processed = TRUE
        WHERE aggregate_id = $1 AND processed = FALSE
        "#,
    )
    .bind(aggregate_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
