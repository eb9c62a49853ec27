//! Driver registry
//!
//! Owns the driver lifecycle and keeps the geospatial index consistent with
//! driver status: a driver is in the index exactly while AVAILABLE. The
//! removal happens before the status transaction commits, so the matcher
//! can never pick up a driver the assignment service would then reject for
//! longer than the in-flight transaction itself.
//!
//! Location updates take the fast path: the geo index is written
//! synchronously, the store write is queued to the location writer and its
//! failures are logged, never surfaced.

use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::models::{CreateDriverRequest, Driver};
use crate::repos::driver_repo;
use crate::services::validate_coordinates;
use crate::state::AppState;
use crate::state_machine::{validate_driver, DriverStatus, EntityKind};
use crate::{audit, workers::location_writer::LocationUpdate};
use chrono::Utc;
use std::str::FromStr;
use uuid::Uuid;

fn view_key(id: Uuid) -> String {
    format!("drivers:view:{}", id)
}

async fn invalidate_view(state: &AppState, id: Uuid) {
    if let Err(e) = state.cache.delete(&view_key(id)).await {
        tracing::warn!(driver_id = %id, error = %e, "failed to invalidate driver view");
    }
}

pub async fn create_driver(state: &AppState, req: CreateDriverRequest) -> DispatchResult<Driver> {
    if req.name.trim().is_empty() {
        return Err(DispatchError::ValidationFailed("name is required".into()));
    }
    if req.phone.trim().is_empty() {
        return Err(DispatchError::ValidationFailed("phone is required".into()));
    }
    validate_coordinates(req.lat, req.lon)?;

    // duplicate phone surfaces as Conflict through the unique constraint
    let driver = driver_repo::insert(
        &state.pool,
        Uuid::new_v4(),
        req.name.trim(),
        req.phone.trim(),
        req.lat,
        req.lon,
    )
    .await?;

    state.geo.upsert(driver.id, req.lon, req.lat).await?;

    tracing::info!(driver_id = %driver.id, "driver created and available");

    state
        .publisher
        .publish(DomainEvent::DriverCreated(driver.clone()))
        .await;

    Ok(driver)
}

/// Fast-path location write: geo index now, store later
pub async fn update_location(
    state: &AppState,
    driver_id: Uuid,
    lat: f64,
    lon: f64,
) -> DispatchResult<()> {
    validate_coordinates(lat, lon)?;

    state.geo.upsert(driver_id, lon, lat).await?;

    let update = LocationUpdate {
        driver_id,
        lat,
        lon,
        observed_at: Utc::now(),
    };

    // loss-tolerant: a full queue drops this sample, the next one catches up
    if let Err(e) = state.location_queue.try_send(update) {
        tracing::debug!(driver_id = %driver_id, error = %e, "location queue full, sample dropped");
    }

    state
        .publisher
        .publish(DomainEvent::DriverLocationUpdated {
            driver_id,
            lat,
            lon,
        })
        .await;

    Ok(())
}

pub async fn update_status(
    state: &AppState,
    driver_id: Uuid,
    target: &str,
) -> DispatchResult<Driver> {
    let target_status = DriverStatus::from_str(target)?;

    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let driver = driver_repo::fetch_for_update(&mut tx, driver_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", driver_id))?;

    let current = DriverStatus::from_str(&driver.status)?;
    validate_driver(current, target_status)?;

    let updated = driver_repo::update_status(&mut tx, driver_id, target_status.as_str()).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Driver,
        driver_id,
        current.as_str(),
        target_status.as_str(),
    )
    .await?;

    // leaving AVAILABLE: drop out of the index before the new status is
    // externally visible, so the matcher cannot hand out a dead candidate
    if target_status != DriverStatus::Available {
        state.geo.remove(driver_id).await?;
    }

    tx.commit().await.map_err(DispatchError::from)?;

    if target_status == DriverStatus::Available {
        match (updated.last_lon, updated.last_lat) {
            (Some(lon), Some(lat)) => state.geo.upsert(driver_id, lon, lat).await?,
            _ => {
                tracing::warn!(driver_id = %driver_id, "driver available without a known position");
            }
        }
    } else {
        // opportunistic sweep of a stale fast-path entry
        let _ = state.geo.sweep_if_stale(driver_id).await;
    }

    invalidate_view(state, driver_id).await;

    tracing::info!(
        driver_id = %driver_id,
        from = current.as_str(),
        to = target_status.as_str(),
        "driver status changed"
    );

    state
        .publisher
        .publish(DomainEvent::DriverStatusChanged(updated.clone()))
        .await;

    Ok(updated)
}

/// Read-through with a short-TTL cached view
pub async fn get_driver(state: &AppState, driver_id: Uuid) -> DispatchResult<Driver> {
    let key = view_key(driver_id);

    if let Ok(Some(cached)) = state.cache.get(&key).await {
        if let Ok(driver) = serde_json::from_str::<Driver>(&cached) {
            return Ok(driver);
        }
    }

    let driver = driver_repo::fetch(&state.pool, driver_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", driver_id))?;

    if let Ok(raw) = serde_json::to_string(&driver) {
        if let Err(e) = state
            .cache
            .set_with_ttl(&key, &raw, state.config.driver_view_ttl)
            .await
        {
            tracing::warn!(driver_id = %driver_id, error = %e, "failed to cache driver view");
        }
    }

    Ok(driver)
}

pub async fn list_drivers(
    state: &AppState,
    status: Option<&str>,
    limit: i64,
) -> DispatchResult<Vec<Driver>> {
    if let Some(status) = status {
        DriverStatus::from_str(status)?;
    }
    let limit = limit.clamp(1, 100);
    Ok(driver_repo::list(&state.pool, status, limit).await?)
}
