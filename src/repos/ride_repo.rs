use crate::models::Ride;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str = "id, rider_id, pickup_lat, pickup_lon, drop_lat, drop_lon, tier, \
     payment_method, status, surge_multiplier, assigned_driver_id, assigned_at, \
     created_at, updated_at";

/// Insert a validated ride; intake lands it directly in MATCHING
#[allow(clippy::too_many_arguments)]
pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    rider_id: Uuid,
    pickup: (f64, f64),
    drop: (f64, f64),
    tier: &str,
    payment_method: &str,
    surge_multiplier: Decimal,
) -> Result<Ride, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        INSERT INTO rides
            (id, rider_id, pickup_lat, pickup_lon, drop_lat, drop_lon,
             tier, payment_method, status, surge_multiplier)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'MATCHING', $9)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(rider_id)
    .bind(pickup.0)
    .bind(pickup.1)
    .bind(drop.0)
    .bind(drop.1)
    .bind(tier)
    .bind(payment_method)
    .bind(surge_multiplier)
    .fetch_one(pool)
    .await
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<Ride>, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM rides
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
) -> Result<Option<Ride>, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM rides
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn list(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<Ride>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, Ride>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM rides
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#
            ))
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Ride>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM rides
                ORDER BY created_at DESC
                LIMIT $1
                "#
            ))
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
}

/// Rides the dispatch worker should look at: MATCHING, younger than the
/// cutoff, oldest first
pub async fn fetch_matching_batch(
    pool: &PgPool,
    created_after: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Ride>, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM rides
        WHERE status = 'MATCHING' AND created_at > $1
        ORDER BY created_at ASC
        LIMIT $2
        "#
    ))
    .bind(created_after)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Bind a driver to a locked MATCHING ride. The partial unique index on
/// assigned_driver_id turns a concurrent double-assign into a 23505.
pub async fn assign(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    driver_id: Uuid,
) -> Result<Ride, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        UPDATE rides
        SET status = 'DRIVER_ASSIGNED', assigned_driver_id = $1, assigned_at = NOW(),
            updated_at = NOW()
        WHERE id = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(driver_id)
    .bind(id)
    .fetch_one(&mut **tx)
    .await
}

/// Write a validated status; caller holds the row lock
pub async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: &str,
) -> Result<Ride, sqlx::Error> {
    sqlx::query_as::<_, Ride>(&format!(
        r#"
        UPDATE rides
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
