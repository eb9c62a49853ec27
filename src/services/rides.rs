//! Ride intake and read paths
//!
//! Intake validates, persists the ride directly in MATCHING and publishes
//! `RIDE_CREATED`. The candidate list returned to the rider is advisory;
//! the dispatch worker performs the actual assignment.

use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::models::{CreateRideRequest, Ride, RideWithCandidates};
use crate::repos::ride_repo;
use crate::services::{matching, validate_coordinates};
use crate::state::AppState;
use rust_decimal::Decimal;
use uuid::Uuid;

const TIERS: &[&str] = &["ECONOMY", "PREMIUM", "LUXURY"];
const PAYMENT_METHODS: &[&str] = &["CARD", "CASH", "WALLET", "UPI"];

fn validate_request(req: &CreateRideRequest) -> DispatchResult<Decimal> {
    validate_coordinates(req.pickup_lat, req.pickup_lon)?;
    validate_coordinates(req.drop_lat, req.drop_lon)?;

    if !TIERS.contains(&req.tier.as_str()) {
        return Err(DispatchError::ValidationFailed(format!(
            "unknown tier: {} (expected one of {:?})",
            req.tier, TIERS
        )));
    }
    if !PAYMENT_METHODS.contains(&req.payment_method.as_str()) {
        return Err(DispatchError::ValidationFailed(format!(
            "unknown payment method: {} (expected one of {:?})",
            req.payment_method, PAYMENT_METHODS
        )));
    }

    let surge = req.surge_multiplier.unwrap_or(Decimal::ONE);
    if surge < Decimal::ONE {
        return Err(DispatchError::ValidationFailed(format!(
            "surge_multiplier must be >= 1.00: {}",
            surge
        )));
    }

    Ok(surge)
}

pub async fn create_ride(
    state: &AppState,
    req: CreateRideRequest,
) -> DispatchResult<RideWithCandidates> {
    let surge = validate_request(&req)?;

    let ride = ride_repo::insert(
        &state.pool,
        Uuid::new_v4(),
        req.rider_id,
        (req.pickup_lat, req.pickup_lon),
        (req.drop_lat, req.drop_lon),
        &req.tier,
        &req.payment_method,
        surge,
    )
    .await?;

    state
        .metrics
        .rides_created_total
        .with_label_values(&[ride.tier.as_str()])
        .inc();

    tracing::info!(
        ride_id = %ride.id,
        rider_id = %ride.rider_id,
        tier = %ride.tier,
        "ride created, entering matching"
    );

    state
        .publisher
        .publish(DomainEvent::RideCreated(ride.clone()))
        .await;

    // advisory only; assignment happens in the dispatch worker
    let candidates =
        matching::find_nearby(state, req.pickup_lat, req.pickup_lon, Some(&req.tier)).await?;

    Ok(RideWithCandidates { ride, candidates })
}

pub async fn get_ride(state: &AppState, id: Uuid) -> DispatchResult<Ride> {
    ride_repo::fetch(&state.pool, id)
        .await?
        .ok_or_else(|| DispatchError::not_found("ride", id))
}

pub async fn list_rides(
    state: &AppState,
    status: Option<&str>,
    limit: i64,
) -> DispatchResult<Vec<Ride>> {
    let limit = limit.clamp(1, 100);
    Ok(ride_repo::list(&state.pool, status, limit).await?)
}
