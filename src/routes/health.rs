use crate::errors::DispatchError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "dispatch-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "live_subscribers": state.fanout.subscriber_count(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<String, DispatchError> {
    state
        .metrics
        .render()
        .map_err(DispatchError::DependencyFailure)
}
