//! Error taxonomy for the dispatch core
//!
//! Services return `DispatchError`; the HTTP layer maps each variant onto a
//! status code through `IntoResponse`. Unique-constraint races surface as
//! `Conflict` so the dispatch worker can treat them as soft misses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid {entity} transition {from} -> {to} (allowed: {allowed:?})")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
        allowed: Vec<&'static str>,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),
}

impl DispatchError {
    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", resource, id))
    }

    /// Short machine-readable code used in error payloads and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::DependencyFailure(_) => "dependency_failure",
            Self::Unprocessable(_) => "unprocessable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DependencyFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            // 23505 = unique_violation: a concurrent writer won the race
            if db_err.code().as_deref() == Some("23505") {
                return Self::Conflict(format!("unique constraint violated: {}", db_err.message()));
            }
        }
        tracing::error!(error = %e, "database error");
        Self::DependencyFailure(format!("store: {}", e))
    }
}

impl From<redis::RedisError> for DispatchError {
    fn from(e: redis::RedisError) -> Self {
        tracing::error!(error = %e, "redis error");
        Self::DependencyFailure(format!("cache: {}", e))
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::InvalidTransition {
                entity,
                from,
                to,
                allowed,
            } => json!({
                "error": self.code(),
                "message": self.to_string(),
                "details": {
                    "entity": entity,
                    "current": from,
                    "target": to,
                    "allowed": allowed,
                }
            }),
            // Do not leak backend details to clients
            Self::DependencyFailure(_) => json!({
                "error": self.code(),
                "message": "a backing service is unavailable",
            }),
            _ => json!({
                "error": self.code(),
                "message": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
