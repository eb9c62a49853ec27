use crate::errors::{DispatchError, DispatchResult};
use crate::idempotency::{replay, IdempotencyStore};
use crate::models::{CreateRideRequest, ListRidesQuery, Ride};
use crate::routes::check_general_limit;
use crate::services::rides;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

/// POST /api/rides - create a ride and return it with advisory candidates
///
/// With an `Idempotency-Key`, the first successful response body is cached
/// and replays are byte-identical.
pub async fn create_ride(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRideRequest>,
) -> Result<Response, DispatchError> {
    check_general_limit(&state, &headers)?;

    let idem_key = IdempotencyStore::key_from_headers(&headers);

    if let Some(key) = &idem_key {
        if let Some(stored) = state.idempotency.lookup("rides", key).await {
            tracing::debug!(idempotency_key = %key, "replaying cached ride response");
            return Ok(replay(stored));
        }
    }

    let result = rides::create_ride(&state, req).await?;
    let body = serde_json::to_string(&result)
        .map_err(|e| DispatchError::DependencyFailure(format!("encode response: {}", e)))?;

    if let Some(key) = &idem_key {
        state
            .idempotency
            .store("rides", key, StatusCode::CREATED.as_u16(), &body)
            .await;
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// GET /api/rides/{id}
pub async fn get_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Ride>> {
    Ok(Json(rides::get_ride(&state, id).await?))
}

/// GET /api/rides?status=&limit=
pub async fn list_rides(
    State(state): State<AppState>,
    Query(query): Query<ListRidesQuery>,
) -> DispatchResult<Json<Vec<Ride>>> {
    let rides = rides::list_rides(
        &state,
        query.status.as_deref(),
        query.limit.unwrap_or(50),
    )
    .await?;
    Ok(Json(rides))
}
