use crate::errors::{DispatchError, DispatchResult};
use crate::models::{
    AcceptResponse, CreateDriverRequest, Driver, DriverAcceptRequest, ListDriversQuery,
    UpdateDriverStatusRequest, UpdateLocationRequest,
};
use crate::routes::check_general_limit;
use crate::services::{assignment, drivers};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

/// POST /api/drivers
pub async fn create_driver(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateDriverRequest>,
) -> Result<(StatusCode, Json<Driver>), DispatchError> {
    check_general_limit(&state, &headers)?;

    let driver = drivers::create_driver(&state, req).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

/// PUT /api/drivers/{id}/location - geo fast path
pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateLocationRequest>,
) -> DispatchResult<Json<serde_json::Value>> {
    if state.limiters.check_location(&id.to_string()).is_err() {
        state
            .metrics
            .rate_limited_total
            .with_label_values(&["location"])
            .inc();
        return Err(DispatchError::RateLimited);
    }

    drivers::update_location(&state, id, req.lat, req.lon).await?;

    Ok(Json(serde_json::json!({
        "driver_id": id,
        "lat": req.lat,
        "lon": req.lon,
    })))
}

/// PUT /api/drivers/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDriverStatusRequest>,
) -> DispatchResult<Json<Driver>> {
    check_general_limit(&state, &headers)?;

    let driver = drivers::update_status(&state, id, &req.status).await?;
    Ok(Json(driver))
}

/// POST /api/drivers/{id}/accept - driver accepts their assigned ride
pub async fn accept_ride(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<DriverAcceptRequest>,
) -> DispatchResult<Json<AcceptResponse>> {
    check_general_limit(&state, &headers)?;

    let (trip, driver) = assignment::initialize_trip(&state, req.ride_id, id).await?;
    Ok(Json(AcceptResponse { trip, driver }))
}

/// GET /api/drivers/{id}
pub async fn get_driver(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Driver>> {
    Ok(Json(drivers::get_driver(&state, id).await?))
}

/// GET /api/drivers?status=&limit=
pub async fn list_drivers(
    State(state): State<AppState>,
    Query(query): Query<ListDriversQuery>,
) -> DispatchResult<Json<Vec<Driver>>> {
    let result = drivers::list_drivers(
        &state,
        query.status.as_deref(),
        query.limit.unwrap_or(50),
    )
    .await?;
    Ok(Json(result))
}
