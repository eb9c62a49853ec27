//! Assignment service
//!
//! Two distinct phases, mirroring real dispatcher semantics: `assign` binds
//! a candidate driver to a ride without touching the driver row, and
//! `initialize_trip` runs when the driver accepts, flipping the driver to
//! ON_TRIP and creating the trip.
//!
//! Both operations lock the ride and the driver in a single statement and
//! validate against the state read under that lock. Races lose cleanly:
//! the partial unique indexes turn a concurrent double-assign or a second
//! live trip into `Conflict`, which the dispatch worker treats as a miss.

use crate::audit;
use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::models::{Ride, Trip};
use crate::repos::{driver_repo, ride_repo, trip_repo};
use crate::state::AppState;
use crate::state_machine::{
    validate_driver, validate_ride, DriverStatus, EntityKind, RideStatus,
};
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// Ride/driver state pair read under a joint row lock
#[derive(Debug, sqlx::FromRow)]
struct LockedPair {
    ride_status: String,
    assigned_driver_id: Option<Uuid>,
    driver_status: String,
}

/// Lock both rows in one statement and return their current states
async fn lock_pair(
    tx: &mut Transaction<'_, Postgres>,
    ride_id: Uuid,
    driver_id: Uuid,
) -> DispatchResult<LockedPair> {
    let pair = sqlx::query_as::<_, LockedPair>(
        r#"
        SELECT r.status AS ride_status, r.assigned_driver_id, d.status AS driver_status
        FROM rides r, drivers d
        WHERE r.id = $1 AND d.id = $2
        FOR UPDATE
        "#,
    )
    .bind(ride_id)
    .bind(driver_id)
    .fetch_optional(&mut **tx)
    .await?;

    match pair {
        Some(pair) => Ok(pair),
        None => {
            // one of the two is missing; name the right one
            let ride_exists = ride_repo::fetch_for_update(tx, ride_id).await?.is_some();
            if ride_exists {
                Err(DispatchError::not_found("driver", driver_id))
            } else {
                Err(DispatchError::not_found("ride", ride_id))
            }
        }
    }
}

/// Bind a candidate driver to a MATCHING ride
///
/// The driver row is locked and checked but not modified; acceptance is a
/// separate phase. Emits `DRIVER_ASSIGNED` and `RIDE_UPDATED` on success.
pub async fn assign(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> DispatchResult<Ride> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let pair = lock_pair(&mut tx, ride_id, driver_id).await?;

    let ride_status = RideStatus::from_str(&pair.ride_status)?;
    validate_ride(ride_status, RideStatus::DriverAssigned)?;

    let driver_status = DriverStatus::from_str(&pair.driver_status)?;
    if driver_status != DriverStatus::Available {
        return Err(DispatchError::Conflict(format!(
            "driver {} is {}, not AVAILABLE",
            driver_id,
            driver_status.as_str()
        )));
    }

    // the partial unique index on assigned_driver_id rejects a concurrent
    // second assignment of the same driver with a Conflict
    let ride = ride_repo::assign(&mut tx, ride_id, driver_id).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Ride,
        ride_id,
        ride_status.as_str(),
        RideStatus::DriverAssigned.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    state
        .metrics
        .assignments_total
        .with_label_values(&["assigned"])
        .inc();

    tracing::info!(
        ride_id = %ride_id,
        driver_id = %driver_id,
        "driver assigned to ride"
    );

    state
        .publisher
        .publish(DomainEvent::DriverAssigned { ride_id, driver_id })
        .await;
    state
        .publisher
        .publish(DomainEvent::RideUpdated(ride.clone()))
        .await;

    state
        .notifier
        .notify_rider(ride.rider_id, "A driver has been assigned to your ride")
        .await;

    Ok(ride)
}

/// Driver acceptance: flip the driver to ON_TRIP and create the trip
///
/// The ride is re-validated under the same lock, so acceptance racing a
/// cancellation cannot create a trip for a dead ride. On success the ride
/// stays DRIVER_ASSIGNED; only the trip's lifecycle moves it further.
pub async fn initialize_trip(
    state: &AppState,
    ride_id: Uuid,
    driver_id: Uuid,
) -> DispatchResult<(Trip, crate::models::Driver)> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let pair = lock_pair(&mut tx, ride_id, driver_id).await?;

    let ride_status = RideStatus::from_str(&pair.ride_status)?;
    if ride_status != RideStatus::DriverAssigned {
        // acceptance racing a cancellation or expiry lands here
        return Err(DispatchError::InvalidTransition {
            entity: EntityKind::Ride.as_str(),
            from: ride_status.as_str().to_string(),
            to: "TRIP_ACCEPTED".to_string(),
            allowed: vec!["DRIVER_ASSIGNED"],
        });
    }
    if pair.assigned_driver_id != Some(driver_id) {
        return Err(DispatchError::Conflict(format!(
            "ride {} is not assigned to driver {}",
            ride_id, driver_id
        )));
    }

    let driver_status = DriverStatus::from_str(&pair.driver_status)?;
    validate_driver(driver_status, DriverStatus::OnTrip)?;

    let driver = driver_repo::update_status(&mut tx, driver_id, DriverStatus::OnTrip.as_str()).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Driver,
        driver_id,
        driver_status.as_str(),
        DriverStatus::OnTrip.as_str(),
    )
    .await?;

    // a second live trip for this driver trips the partial unique index
    let trip = trip_repo::insert(&mut tx, Uuid::new_v4(), ride_id, driver_id).await?;

    // off the index before ON_TRIP becomes externally visible
    state.geo.remove(driver_id).await?;

    tx.commit().await.map_err(DispatchError::from)?;

    if let Err(e) = state
        .cache
        .delete(&format!("drivers:view:{}", driver_id))
        .await
    {
        tracing::warn!(driver_id = %driver_id, error = %e, "failed to invalidate driver view");
    }

    state
        .metrics
        .trips_total
        .with_label_values(&["accept", "ok"])
        .inc();

    tracing::info!(
        trip_id = %trip.id,
        ride_id = %ride_id,
        driver_id = %driver_id,
        "trip created on driver acceptance"
    );

    state
        .publisher
        .publish(DomainEvent::DriverStatusChanged(driver.clone()))
        .await;
    state
        .publisher
        .publish(DomainEvent::TripAccepted(trip.clone()))
        .await;

    Ok((trip, driver))
}
