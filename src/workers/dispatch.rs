//! Dispatch worker
//!
//! Polls MATCHING rides and drives matching + assignment. Multiple
//! instances are safe: every mutation happens under row locks and a lost
//! race reads as a soft miss. Rides that sit in MATCHING past the match
//! timeout with no candidates are expired; rides older than the max-age
//! cutoff fall out of the poll entirely.
//!
//! Shutdown is cooperative: the loop observes the signal between
//! iterations and finishes the one in flight.

use crate::audit;
use crate::errors::{DispatchError, DispatchResult};
use crate::events::DomainEvent;
use crate::models::Ride;
use crate::repos::ride_repo;
use crate::services::{assignment, matching};
use crate::state::AppState;
use crate::state_machine::{validate_ride, EntityKind, RideStatus};
use chrono::Utc;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::watch;

pub async fn run_dispatch_worker(state: AppState, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        poll_interval = ?state.config.dispatch_poll_interval,
        batch_size = state.config.dispatch_batch_size,
        "dispatch worker started"
    );

    let mut interval = tokio::time::interval(state.config.dispatch_poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let started = Instant::now();
        match run_iteration(&state).await {
            Ok(processed) if processed > 0 => {
                tracing::debug!(processed, "dispatch iteration complete");
            }
            Ok(_) => {}
            Err(e) => {
                // never crash the worker; the next poll retries
                tracing::error!(error = %e, "dispatch iteration failed");
            }
        }
        state
            .metrics
            .dispatch_iteration_seconds
            .with_label_values(&["dispatch"])
            .observe(started.elapsed().as_secs_f64());
    }

    tracing::info!("dispatch worker stopped");
}

/// One poll: fetch the batch and process it in concurrent sub-batches
pub async fn run_iteration(state: &AppState) -> DispatchResult<usize> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(state.config.dispatch_max_age)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

    let rides =
        ride_repo::fetch_matching_batch(&state.pool, cutoff, state.config.dispatch_batch_size)
            .await?;
    let processed = rides.len();

    for chunk in rides.chunks(state.config.dispatch_subbatch.max(1)) {
        let results = futures::future::join_all(
            chunk.iter().map(|ride| process_ride(state, ride)),
        )
        .await;

        for (ride, result) in chunk.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(ride_id = %ride.id, error = %e, "ride dispatch attempt failed");
            }
        }
    }

    Ok(processed)
}

/// Match one ride and walk its candidates until one assignment sticks
async fn process_ride(state: &AppState, ride: &Ride) -> DispatchResult<()> {
    let candidates =
        matching::find_nearby(state, ride.pickup_lat, ride.pickup_lon, Some(&ride.tier)).await?;

    if candidates.is_empty() {
        let age = Utc::now() - ride.created_at;
        let timeout = chrono::Duration::from_std(state.config.dispatch_match_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        if age > timeout {
            expire_ride(state, ride.id).await?;
        }
        return Ok(());
    }

    for candidate in candidates {
        match assignment::assign(state, ride.id, candidate.driver_id).await {
            Ok(_) => return Ok(()),
            Err(DispatchError::Conflict(reason)) => {
                // candidate taken or went unavailable between index and lock
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["conflict"])
                    .inc();
                tracing::debug!(
                    ride_id = %ride.id,
                    driver_id = %candidate.driver_id,
                    reason = %reason,
                    "candidate miss, trying next"
                );
            }
            Err(DispatchError::InvalidTransition { entity, .. }) if entity == "ride" => {
                // the ride moved on (cancelled or assigned elsewhere)
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["not_matchable"])
                    .inc();
                return Ok(());
            }
            Err(e) => {
                state
                    .metrics
                    .assignments_total
                    .with_label_values(&["error"])
                    .inc();
                return Err(e);
            }
        }
    }

    Ok(())
}

/// MATCHING -> EXPIRED under the row lock; the rider learns no driver came
async fn expire_ride(state: &AppState, ride_id: uuid::Uuid) -> DispatchResult<()> {
    let mut tx = state.pool.begin().await.map_err(DispatchError::from)?;

    let ride = match ride_repo::fetch_for_update(&mut tx, ride_id).await? {
        Some(ride) => ride,
        // gone or already transitioned elsewhere
        None => return Ok(()),
    };

    let current = RideStatus::from_str(&ride.status)?;
    if current != RideStatus::Matching {
        return Ok(());
    }
    validate_ride(current, RideStatus::Expired)?;

    let ride = ride_repo::update_status(&mut tx, ride_id, RideStatus::Expired.as_str()).await?;
    audit::record_transition(
        &mut tx,
        EntityKind::Ride,
        ride_id,
        current.as_str(),
        RideStatus::Expired.as_str(),
    )
    .await?;

    tx.commit().await.map_err(DispatchError::from)?;

    state
        .metrics
        .rides_expired_total
        .with_label_values(&["timeout"])
        .inc();
    tracing::info!(ride_id = %ride_id, "ride expired with no candidates");

    state
        .publisher
        .publish(DomainEvent::RideUpdated(ride.clone()))
        .await;
    state
        .notifier
        .notify_rider(ride.rider_id, "No drivers available, please try again")
        .await;

    Ok(())
}
