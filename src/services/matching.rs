//! Matching service
//!
//! Candidate lookup is a single geospatial index call; the store is never
//! touched on this path. The index only holds AVAILABLE drivers, so every
//! member returned is a candidate until the assignment transaction proves
//! otherwise.

use crate::errors::DispatchResult;
use crate::models::Candidate;
use crate::state::AppState;
use std::time::Instant;

/// Ranked AVAILABLE drivers near the pickup point, closest first
///
/// `tier` is a capability hook for fleets that segment drivers by vehicle
/// class; the default matcher ignores it.
pub async fn find_nearby(
    state: &AppState,
    pickup_lat: f64,
    pickup_lon: f64,
    _tier: Option<&str>,
) -> DispatchResult<Vec<Candidate>> {
    let started = Instant::now();

    let candidates = state
        .geo
        .search_nearby(
            pickup_lon,
            pickup_lat,
            state.config.match_radius_km,
            state.config.match_limit,
        )
        .await?;

    let outcome = if candidates.is_empty() { "empty" } else { "hit" };
    state
        .metrics
        .match_duration_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());

    Ok(candidates)
}
