use crate::models::Driver;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const COLUMNS: &str =
    "id, name, phone, status, rating, last_lat, last_lon, created_at, updated_at";

/// Insert a new driver; starts AVAILABLE at the given position
pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    name: &str,
    phone: &str,
    lat: f64,
    lon: f64,
) -> Result<Driver, sqlx::Error> {
    sqlx::query_as::<_, Driver>(&format!(
        r#"
        INSERT INTO drivers (id, name, phone, status, last_lat, last_lon)
        VALUES ($1, $2, $3, 'AVAILABLE', $4, $5)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(name)
    .bind(phone)
    .bind(lat)
    .bind(lon)
    .fetch_one(pool)
    .await
}

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<Driver>, sqlx::Error> {
    sqlx::query_as::<_, Driver>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM drivers
        WHERE id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Lock the driver row for the rest of the transaction
pub async fn fetch_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Driver>, sqlx::Error> {
    sqlx::query_as::<_, Driver>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM drivers
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Write a validated status; caller holds the row lock
pub async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: &str,
) -> Result<Driver, sqlx::Error> {
    sqlx::query_as::<_, Driver>(&format!(
        r#"
        UPDATE drivers
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

/// Async store write behind the geo fast path; last write wins
pub async fn update_location(
    pool: &PgPool,
    id: Uuid,
    lat: f64,
    lon: f64,
    observed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE drivers
        SET last_lat = $1, last_lon = $2, updated_at = GREATEST(updated_at, $3)
        WHERE id = $4
        "#,
    )
    .bind(lat)
    .bind(lon)
    .bind(observed_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<Driver>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, Driver>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM drivers
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
            sqlx::query_as::<_, Driver>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM drivers
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
