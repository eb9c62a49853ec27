pub mod drivers;
pub mod health;
pub mod payments;
pub mod rides;
pub mod trips;

use crate::errors::DispatchError;
use crate::state::AppState;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;

/// Assemble the full API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/api/rides", post(rides::create_ride).get(rides::list_rides))
        .route("/api/rides/{id}", get(rides::get_ride))
        .route(
            "/api/drivers",
            post(drivers::create_driver).get(drivers::list_drivers),
        )
        .route("/api/drivers/{id}", get(drivers::get_driver))
        .route("/api/drivers/{id}/location", put(drivers::update_location))
        .route("/api/drivers/{id}/status", put(drivers::update_status))
        .route("/api/drivers/{id}/accept", post(drivers::accept_ride))
        .route("/api/trips/{id}", get(trips::get_trip))
        .route("/api/trips/{id}/start", post(trips::start_trip))
        .route("/api/trips/{id}/pause", post(trips::pause_trip))
        .route("/api/trips/{id}/end", post(trips::end_trip))
        .route("/api/trips/{id}/cancel", post(trips::cancel_trip))
        .route("/api/trips/{id}/receipt", get(trips::trip_receipt))
        .route(
            "/api/payments",
            post(payments::create_payment),
        )
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/api/payments/webhook", post(payments::webhook))
        .with_state(state)
}

/// Client identity for rate limiting; authenticated identity is supplied by
/// the transport layer in front of this service
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-client-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// General request budget shared by the read/write surface
pub(crate) fn check_general_limit(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), DispatchError> {
    let client = client_key(headers);
    state.limiters.check_general(&client).map_err(|_| {
        state
            .metrics
            .rate_limited_total
            .with_label_values(&["general"])
            .inc();
        DispatchError::RateLimited
    })
}
