use crate::models::Payment;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, trip_id, amount, status, psp_transaction_id, psp_response, \
     retry_count, max_retries, last_retry_at, next_retry_at, failure_reason, \
     created_at, updated_at";

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    trip_id: Uuid,
    amount: Decimal,
    max_retries: i32,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        INSERT INTO payments (id, trip_id, amount, status, retry_count, max_retries)
        VALUES ($1, $2, $3, 'PENDING', 0, $4)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(trip_id)
    .bind(amount)
    .bind(max_retries)
    .fetch_one(&mut **tx)
    .await
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM payments
        WHERE id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM payments
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Latest payment for a trip, for the receipt view
pub async fn fetch_latest_by_trip(
    pool: &PgPool,
    trip_id: Uuid,
) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM payments
        WHERE trip_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(trip_id)
    .fetch_optional(pool)
    .await
}

/// PSP accepted the charge: the payment is in flight on the provider side
pub async fn mark_processing(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    transaction_id: &str,
    raw_response: &JsonValue,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET status = 'PROCESSING', psp_transaction_id = $1, psp_response = $2,
            updated_at = NOW()
        WHERE id = $3
        RETURNING {COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(raw_response)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// PSP call failed: bump the retry counter and schedule the next attempt
pub async fn record_retry_failure(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    next_retry_at: DateTime<Utc>,
    failure_reason: &str,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET retry_count = retry_count + 1, last_retry_at = NOW(), next_retry_at = $1,
            failure_reason = $2, updated_at = NOW()
        WHERE id = $3
        RETURNING {COLUMNS}
        "#
    ))
    .bind(next_retry_at)
    .bind(failure_reason)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// Retry budget exhausted
pub async fn mark_failed(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    failure_reason: &str,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET status = 'FAILED', failure_reason = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(failure_reason)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// Webhook-driven terminal write: COMPLETED or FAILED
pub async fn finalize(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: &str,
    transaction_id: Option<&str>,
    raw_response: &JsonValue,
) -> Result<Payment, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET status = $1, psp_transaction_id = COALESCE($2, psp_transaction_id),
            psp_response = $3, updated_at = NOW()
        WHERE id = $4
        RETURNING {COLUMNS}
        "#
    ))
    .bind(status)
    .bind(transaction_id)
    .bind(raw_response)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}
