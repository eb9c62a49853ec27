//! PSP webhook signature verification
//!
//! Webhooks carry a `psp-signature: t=<unix>,v1=<hex>` header where `v1` is
//! HMAC-SHA256 over `"{t}.{raw_body}"` keyed by the shared webhook secret.
//! The timestamp bounds replay; the comparison is constant-time. An
//! unsigned or invalid request is rejected before any state is touched.

use crate::errors::DispatchError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "psp-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Webhook body posted by the PSP when a charge reaches a terminal state
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub payment_id: Uuid,
    /// `succeeded` or `failed`
    pub status: String,
    pub transaction_id: Option<String>,
}

fn unauthorized() -> DispatchError {
    DispatchError::Unauthorized("webhook signature verification failed".to_string())
}

/// Verify a webhook signature against the raw request body
pub fn verify_signature(
    raw_body: &str,
    signature: &str,
    webhook_secret: &str,
    tolerance_secs: i64,
) -> Result<(), DispatchError> {
    let parts: Vec<&str> = signature.split(',').collect();

    let timestamp = parts
        .iter()
        .find_map(|p| p.strip_prefix("t="))
        .ok_or_else(unauthorized)?;

    let received_signature = parts
        .iter()
        .find_map(|p| p.strip_prefix("v1="))
        .ok_or_else(unauthorized)?;

    // replay window
    let webhook_time = timestamp.parse::<i64>().map_err(|_| unauthorized())?;
    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| unauthorized())?
        .as_secs() as i64;

    if (current_time - webhook_time).abs() > tolerance_secs {
        return Err(unauthorized());
    }

    let signed_payload = format!("{}.{}", timestamp, raw_body);

    let mut mac =
        HmacSha256::new_from_slice(webhook_secret.as_bytes()).map_err(|_| unauthorized())?;
    mac.update(signed_payload.as_bytes());
    let expected_bytes = mac.finalize().into_bytes();

    let received_bytes = hex::decode(received_signature).map_err(|_| unauthorized())?;

    if received_bytes.len() != expected_bytes.len() {
        return Err(unauthorized());
    }

    // constant-time comparison
    let mut diff = 0u8;
    for (a, b) in received_bytes.iter().zip(expected_bytes.iter()) {
        diff |= a ^ b;
    }

    if diff == 0 {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

/// Build a signature header value; used by tests and local tooling
pub fn sign(raw_body: &str, timestamp: i64, webhook_secret: &str) -> String {
    let signed_payload = format!("{}.{}", timestamp, raw_body);
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(signed_payload.as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn test_valid_signature() {
        let body = r#"{"payment_id":"7e6f62a4-0000-0000-0000-000000000000","status":"succeeded"}"#;
        let signature = sign(body, now(), SECRET);

        assert!(verify_signature(body, &signature, SECRET, DEFAULT_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let body = r#"{"status":"succeeded"}"#;
        let signature = format!("t={},v1=deadbeef", now());

        assert!(verify_signature(body, &signature, SECRET, DEFAULT_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = r#"{"status":"succeeded"}"#;
        let signature = sign(body, now(), SECRET);
        let tampered = r#"{"status":"failed"}"#;

        assert!(verify_signature(tampered, &signature, SECRET, DEFAULT_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = r#"{"status":"succeeded"}"#;
        let signature = sign(body, now(), "whsec_other");

        assert!(verify_signature(body, &signature, SECRET, DEFAULT_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn test_expired_timestamp_rejected() {
        let body = r#"{"status":"succeeded"}"#;
        let old = now() - 3600;
        let signature = sign(body, old, SECRET);

        assert!(verify_signature(body, &signature, SECRET, DEFAULT_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let body = "{}";
        assert!(verify_signature(body, "", SECRET, DEFAULT_TOLERANCE_SECS).is_err());
        assert!(verify_signature(body, "v1=abc", SECRET, DEFAULT_TOLERANCE_SECS).is_err());
        assert!(verify_signature(body, "t=notanumber,v1=abc", SECRET, DEFAULT_TOLERANCE_SECS).is_err());
    }
}
