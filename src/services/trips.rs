//! Trip lifecycle
//!
//! Every transition follows the same shape: begin transaction, lock the
//! trip (and the ride and driver when they are co-mutated), validate the
//! transition against the locked state, write, commit, then publish events
//! and notify. Ending a trip computes the fare synchronously and settles
//! the driver and ride in the same transaction.

use crate::audit;
use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::fare;
use crate::models::{Receipt, Ride, Trip};
use crate::repos::{driver_repo, payment_repo, ride_repo, trip_repo};
use crate::state::AppState;
use crate::state_machine::{
    validate_driver, validate_ride, validate_trip, DriverStatus, EntityKind, RideStatus,
    TripStatus,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// Lock the trip row and parse its current status
async fn lock_trip(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> DispatchResult<(Trip, TripStatus)> {
    let trip = trip_repo::fetch_for_update(tx, trip_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("trip", trip_id))?;
    let status = TripStatus::from_str(&trip.status)?;
    Ok((trip, status))
}

/// Lock the ride backing a trip; the trip row must already be locked
async fn lock_ride(
    tx: &mut Transaction<'_, Postgres>,
    ride_id: Uuid,
) -> DispatchResult<(Ride, RideStatus)> {
    let ride = ride_repo::fetch_for_update(tx, ride_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", ride_id))?;
    let status = RideStatus::from_str(&ride.status)?;
    Ok((ride, status))
}

/// CREATED -> STARTED, or PAUSED -> STARTED on resume
pub async fn start(state: &AppState, trip_id: Uuid) -> DispatchResult<Trip> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let (_, current) = lock_trip(&mut tx, trip_id).await?;
    validate_trip(current, TripStatus::Started)?;

    let trip = trip_repo::mark_started(&mut tx, trip_id).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Trip,
        trip_id,
        current.as_str(),
        TripStatus::Started.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    state
        .metrics
        .trips_total
        .with_label_values(&["start", "ok"])
        .inc();
    tracing::info!(trip_id = %trip_id, from = current.as_str(), "trip started");

    state
        .publisher
        .publish(DomainEvent::TripStarted(trip.clone()))
        .await;

    Ok(trip)
}

/// STARTED -> PAUSED
pub async fn pause(state: &AppState, trip_id: Uuid) -> DispatchResult<Trip> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let (_, current) = lock_trip(&mut tx, trip_id).await?;
    validate_trip(current, TripStatus::Paused)?;

    let trip = trip_repo::update_status(&mut tx, trip_id, TripStatus::Paused.as_str()).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Trip,
        trip_id,
        current.as_str(),
        TripStatus::Paused.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    state
        .metrics
        .trips_total
        .with_label_values(&["pause", "ok"])
        .inc();
    tracing::info!(trip_id = %trip_id, "trip paused");

    Ok(trip)
}

/// Cancel an in-flight trip; frees the driver and cancels the ride
pub async fn cancel(
    state: &AppState,
    trip_id: Uuid,
    reason: Option<&str>,
) -> DispatchResult<Trip> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let (trip, current) = lock_trip(&mut tx, trip_id).await?;
    validate_trip(current, TripStatus::Cancelled)?;

    let (_, ride_status) = lock_ride(&mut tx, trip.ride_id).await?;
    validate_ride(ride_status, RideStatus::Cancelled)?;

    let driver = driver_repo::fetch_for_update(&mut tx, trip.driver_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", trip.driver_id))?;
    let driver_status = DriverStatus::from_str(&driver.status)?;
    validate_driver(driver_status, DriverStatus::Available)?;

    let trip = trip_repo::update_status(&mut tx, trip_id, TripStatus::Cancelled.as_str()).await?;
    let driver =
        driver_repo::update_status(&mut tx, trip.driver_id, DriverStatus::Available.as_str())
            .await?;
    let ride = ride_repo::update_status(&mut tx, trip.ride_id, RideStatus::Cancelled.as_str())
        .await?;

    audit::record_transition(
        &mut tx,
        EntityKind::Trip,
        trip_id,
        current.as_str(),
        TripStatus::Cancelled.as_str(),
    )
    .await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Driver,
        driver.id,
        driver_status.as_str(),
        DriverStatus::Available.as_str(),
    )
    .await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Ride,
        ride.id,
        ride_status.as_str(),
        RideStatus::Cancelled.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    // back into the matcher's pool
    if let (Some(lon), Some(lat)) = (driver.last_lon, driver.last_lat) {
        if let Err(e) = state.geo.upsert(driver.id, lon, lat).await {
            tracing::warn!(driver_id = %driver.id, error = %e, "failed to re-index driver");
        }
    }
    if let Err(e) = state
        .cache
        .delete(&format!("drivers:view:{}", driver.id))
        .await
    {
        tracing::warn!(driver_id = %driver.id, error = %e, "failed to invalidate driver view");
    }

    state
        .metrics
        .trips_total
        .with_label_values(&["cancel", "ok"])
        .inc();
    tracing::info!(
        trip_id = %trip_id,
        reason = reason.unwrap_or("unspecified"),
        "trip cancelled"
    );

    state
        .publisher
        .publish(DomainEvent::DriverStatusChanged(driver))
        .await;
    state
        .publisher
        .publish(DomainEvent::RideUpdated(ride.clone()))
        .await;

    state
        .notifier
        .notify_rider(
            ride.rider_id,
            &format!("Your trip was cancelled: {}", reason.unwrap_or("unspecified")),
        )
        .await;

    Ok(trip)
}

/// End a trip: compute the fare, settle driver and ride, all in one commit
pub async fn end(
    state: &AppState,
    trip_id: Uuid,
    distance_km: Option<Decimal>,
    duration_sec: Option<i32>,
) -> DispatchResult<Trip> {
    let ended_at = Utc::now();

    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let (trip, current) = lock_trip(&mut tx, trip_id).await?;
    validate_trip(current, TripStatus::Ended)?;

    let (ride, ride_status) = lock_ride(&mut tx, trip.ride_id).await?;
    validate_ride(ride_status, RideStatus::Completed)?;

    let driver = driver_repo::fetch_for_update(&mut tx, trip.driver_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", trip.driver_id))?;
    let driver_status = DriverStatus::from_str(&driver.status)?;
    validate_driver(driver_status, DriverStatus::Available)?;

    // started_at is non-null for STARTED/PAUSED trips; validated transitions
    // make a missing value a data fault, not a caller error
    let started_at = trip.started_at.ok_or_else(|| {
        DispatchError::DependencyFailure(format!("trip {} has no started_at", trip_id))
    })?;

    let duration_sec = match duration_sec {
        Some(d) => d,
        None => (ended_at - started_at).num_seconds().max(0) as i32,
    };
    let distance_km = distance_km.unwrap_or(Decimal::ZERO);

    let fare = fare::compute_fare(&ride.tier, distance_km, duration_sec, ride.surge_multiplier)?;

    let trip = trip_repo::mark_ended(
        &mut tx,
        trip_id,
        ended_at,
        distance_km,
        duration_sec,
        fare.base_fare,
        fare.total_fare,
    )
    .await?;
    let driver =
        driver_repo::update_status(&mut tx, trip.driver_id, DriverStatus::Available.as_str())
            .await?;
    let ride = ride_repo::update_status(&mut tx, trip.ride_id, RideStatus::Completed.as_str())
        .await?;

    audit::record_transition(
        &mut tx,
        EntityKind::Trip,
        trip_id,
        current.as_str(),
        TripStatus::Ended.as_str(),
    )
    .await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Driver,
        driver.id,
        driver_status.as_str(),
        DriverStatus::Available.as_str(),
    )
    .await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Ride,
        ride.id,
        ride_status.as_str(),
        RideStatus::Completed.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    if let (Some(lon), Some(lat)) = (driver.last_lon, driver.last_lat) {
        if let Err(e) = state.geo.upsert(driver.id, lon, lat).await {
            tracing::warn!(driver_id = %driver.id, error = %e, "failed to re-index driver");
        }
    }
    if let Err(e) = state
        .cache
        .delete(&format!("drivers:view:{}", driver.id))
        .await
    {
        tracing::warn!(driver_id = %driver.id, error = %e, "failed to invalidate driver view");
    }

    state
        .metrics
        .trips_total
        .with_label_values(&["end", "ok"])
        .inc();
    tracing::info!(
        trip_id = %trip_id,
        total_fare = %fare.total_fare,
        "trip ended, fare computed"
    );

    state
        .publisher
        .publish(DomainEvent::TripEnded(trip.clone()))
        .await;
    state
        .publisher
        .publish(DomainEvent::DriverStatusChanged(driver))
        .await;
    state
        .publisher
        .publish(DomainEvent::RideUpdated(ride.clone()))
        .await;

    state
        .notifier
        .notify_rider(
            ride.rider_id,
            &format!("Your trip is complete. Total fare: {}", fare.total_fare),
        )
        .await;

    Ok(trip)
}

/// Read-only receipt for an ENDED trip
pub async fn receipt(state: &AppState, trip_id: Uuid) -> DispatchResult<Receipt> {
    let trip = trip_repo::fetch(&state.pool, trip_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("trip", trip_id))?;

    if TripStatus::from_str(&trip.status)? != TripStatus::Ended {
        return Err(DispatchError::not_found("receipt for trip", trip_id));
    }

    let ride = ride_repo::fetch(&state.pool, trip.ride_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", trip.ride_id))?;
    let driver = driver_repo::fetch(&state.pool, trip.driver_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", trip.driver_id))?;
    let payment = payment_repo::fetch_latest_by_trip(&state.pool, trip_id).await?;

    let receipt = Receipt {
        trip,
        ride,
        driver,
        payment,
    };

    state
        .publisher
        .publish(DomainEvent::TripReceipt(Box::new(receipt.clone())))
        .await;

    Ok(receipt)
}
