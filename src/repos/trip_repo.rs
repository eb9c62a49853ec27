use crate::models::Trip;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, ride_id, driver_id, status, started_at, ended_at, distance_km, \
     duration_sec, base_fare, total_fare, created_at, updated_at";

/// Insert a trip in CREATED. The partial unique index on driver_id turns a
/// second live trip for the same driver into a 23505.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    ride_id: Uuid,
    driver_id: Uuid,
) -> Result<Trip, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        INSERT INTO trips (id, ride_id, driver_id, status)
        VALUES ($1, $2, $3, 'CREATED')
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(ride_id)
    .bind(driver_id)
    .fetch_one(&mut **tx)
    .await
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<Trip>, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM trips
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
) -> Result<Option<Trip>, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM trips
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Move into STARTED; `started_at` is only stamped on the first start, a
/// resume from PAUSED keeps the original value
pub async fn mark_started(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Trip, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        UPDATE trips
        SET status = 'STARTED', started_at = COALESCE(started_at, NOW()), updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// Write a validated status; caller holds the row lock
pub async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: &str,
) -> Result<Trip, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        UPDATE trips
        SET status = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(status)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// Close out a trip with its metrics and fares
#[allow(clippy::too_many_arguments)]
pub async fn mark_ended(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    ended_at: DateTime<Utc>,
    distance_km: Decimal,
    duration_sec: i32,
    base_fare: Decimal,
    total_fare: Decimal,
) -> Result<Trip, sqlx::Error> {
    sqlx::query_as::<_, Trip>(&format!(
        r#"
        UPDATE trips
        SET status = 'ENDED', ended_at = $1, distance_km = $2, duration_sec = $3,
            base_fare = $4, total_fare = $5, updated_at = NOW()
        WHERE id = $6
        RETURNING {COLUMNS}
        "#
    ))
    .bind(ended_at)
    .bind(distance_km)
    .bind(duration_sec)
    .bind(base_fare)
    .bind(total_fare)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}
