//! Idempotency handling for creation endpoints
//!
//! A caller-supplied `Idempotency-Key` makes a create safe to retry: the
//! first successful (2xx) response body is cached verbatim for the TTL, and
//! replays return it byte for byte. Keys are namespaced per endpoint
//! category so a ride key can never collide with a payment key.
//!
//! The cache is advisory. Lookup and store failures are logged and treated
//! as a miss, which re-runs an operation that is safe to re-run.

use crate::cache::KvCache;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const HEADER: &str = "idempotency-key";

/// A cached response: status plus the exact body bytes served originally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: String,
}

#[derive(Clone)]
pub struct IdempotencyStore {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn cache_key(category: &str, key: &str) -> String {
        format!("idem:{}:{}", category, key)
    }

    /// Extract the idempotency key from request headers, if any
    pub fn key_from_headers(headers: &HeaderMap) -> Option<String> {
        headers
            .get(HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    /// Return the previously stored response for this key, if present
    pub async fn lookup(&self, category: &str, key: &str) -> Option<StoredResponse> {
        match self.cache.get(&Self::cache_key(category, key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<StoredResponse>(&raw) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    tracing::warn!(error = %e, "corrupt idempotency record, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "idempotency lookup failed, treating as miss");
                None
            }
        }
    }

    /// Commit a successful response under the key. Only 2xx responses are
    /// cached; failures must stay retryable.
    pub async fn store(&self, category: &str, key: &str, status_code: u16, body: &str) {
        if !(200..300).contains(&status_code) {
            return;
        }

        let record = StoredResponse {
            status_code,
            body: body.to_string(),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode idempotency record");
                return;
            }
        };

        if let Err(e) = self
            .cache
            .set_with_ttl(&Self::cache_key(category, key), &raw, self.ttl)
            .await
        {
            tracing::warn!(error = %e, "failed to store idempotency record");
        }
    }
}

/// Rebuild the original response from a stored record
pub fn replay(stored: StoredResponse) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(stored.status_code).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "application/json")
        .body(stored.body.into())
        .unwrap_or_else(|_| Response::new("".into()))
}
