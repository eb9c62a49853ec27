use crate::errors::{DispatchError, DispatchResult};
use crate::models::{CancelTripRequest, EndTripRequest, Receipt, Trip};
use crate::repos::trip_repo;
use crate::routes::check_general_limit;
use crate::services::trips;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

/// GET /api/trips/{id}
pub async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Trip>> {
    let trip = trip_repo::fetch(&state.pool, id)
        .await
        .map_err(DispatchError::from)?
        .ok_or_else(|| DispatchError::not_found("trip", id))?;
    Ok(Json(trip))
}

/// POST /api/trips/{id}/start - also resumes a paused trip
pub async fn start_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Trip>> {
    check_general_limit(&state, &headers)?;
    Ok(Json(trips::start(&state, id).await?))
}

/// POST /api/trips/{id}/pause
pub async fn pause_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Trip>> {
    check_general_limit(&state, &headers)?;
    Ok(Json(trips::pause(&state, id).await?))
}

/// POST /api/trips/{id}/end - computes the fare and settles driver + ride
pub async fn end_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<EndTripRequest>,
) -> DispatchResult<Json<Trip>> {
    check_general_limit(&state, &headers)?;
    Ok(Json(trips::end(&state, id, req.distance_km, req.duration_sec).await?))
}

/// POST /api/trips/{id}/cancel
pub async fn cancel_trip(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelTripRequest>,
) -> DispatchResult<Json<Trip>> {
    check_general_limit(&state, &headers)?;
    Ok(Json(trips::cancel(&state, id, req.reason.as_deref()).await?))
}

/// GET /api/trips/{id}/receipt
pub async fn trip_receipt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Receipt>> {
    Ok(Json(trips::receipt(&state, id).await?))
}
