use crate::errors::{DispatchError, DispatchResult};
use crate::idempotency::{replay, IdempotencyStore};
use crate::models::{CreatePaymentRequest, Payment};
use crate::psp::webhook::SIGNATURE_HEADER;
use crate::routes::client_key;
use crate::services::payments;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

/// POST /api/payments - create a payment for an ended trip
///
/// Supports `Idempotency-Key` the same way ride creation does.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Response, DispatchError> {
    let client = client_key(&headers);
    if state.limiters.check_payment(&client).is_err() {
        state
            .metrics
            .rate_limited_total
            .with_label_values(&["payment"])
            .inc();
        return Err(DispatchError::RateLimited);
    }

    let idem_key = IdempotencyStore::key_from_headers(&headers);

    if let Some(key) = &idem_key {
        if let Some(stored) = state.idempotency.lookup("payments", key).await {
            tracing::debug!(idempotency_key = %key, "replaying cached payment response");
            return Ok(replay(stored));
        }
    }

    let payment = payments::create_payment(&state, req.trip_id).await?;
    let body = serde_json::to_string(&payment)
        .map_err(|e| DispatchError::DependencyFailure(format!("encode response: {}", e)))?;

    if let Some(key) = &idem_key {
        state
            .idempotency
            .store("payments", key, StatusCode::CREATED.as_u16(), &body)
            .await;
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

/// GET /api/payments/{id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> DispatchResult<Json<Payment>> {
    Ok(Json(payments::get_payment(&state, id).await?))
}

/// POST /api/payments/webhook - PSP confirmation callback
///
/// The raw body is verified against the signature header before parsing;
/// unsigned requests are rejected with 401 and no state is written.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> DispatchResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let payment = payments::handle_webhook(&state, &body, signature).await?;

    Ok(Json(serde_json::json!({
        "received": true,
        "payment_id": payment.id,
        "status": payment.status,
    })))
}
