//! Payment Service Provider integration
//!
//! The PSP is a remote collaborator: we submit a charge, it answers with an
//! acceptance (the charge is now in flight on their side) and later confirms
//! the terminal outcome through a signed webhook. Provider errors never
//! reach the rider; they feed the payment retry machinery.

pub mod webhook;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PspError {
    #[error("psp transport error: {0}")]
    Transport(String),

    #[error("psp rejected charge ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// The PSP accepted the charge for asynchronous processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PspAcceptance {
    pub transaction_id: String,
    pub raw: JsonValue,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Submit a charge. Charges are keyed by `payment_id` on the provider
    /// side, so resubmitting the same payment is tolerated.
    async fn charge(&self, payment_id: Uuid, amount: Decimal) -> Result<PspAcceptance, PspError>;
}

#[derive(Debug, Serialize)]
struct ChargeRequest {
    payment_id: Uuid,
    amount: Decimal,
    currency: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    transaction_id: String,
}

/// HTTP client for the real provider
#[derive(Clone)]
pub struct HttpPsp {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPsp {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, PspError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PspError::Transport(e.to_string()))?;

        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl PaymentProvider for HttpPsp {
    async fn charge(&self, payment_id: Uuid, amount: Decimal) -> Result<PspAcceptance, PspError> {
        let url = format!("{}/charges", self.base_url);
        let body = ChargeRequest {
            payment_id,
            amount,
            currency: "USD",
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(PspError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let raw: JsonValue = response
            .json()
            .await
            .map_err(|e| PspError::Transport(e.to_string()))?;

        let parsed: ChargeResponse = serde_json::from_value(raw.clone())
            .map_err(|e| PspError::Transport(format!("malformed charge response: {}", e)))?;

        Ok(PspAcceptance {
            transaction_id: parsed.transaction_id,
            raw,
        })
    }
}

/// Mock provider for development and tests
///
/// Fails the first `fail_first` charges with a transport error, then
/// accepts everything, which is exactly the shape the retry pipeline needs
/// to be exercised against.
#[derive(Default)]
pub struct MockPsp {
    fail_first: u32,
    calls: AtomicU32,
}

impl MockPsp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for MockPsp {
    async fn charge(&self, payment_id: Uuid, amount: Decimal) -> Result<PspAcceptance, PspError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if call < self.fail_first {
            tracing::warn!(payment_id = %payment_id, call, "mock psp simulated failure");
            return Err(PspError::Transport("simulated psp outage".to_string()));
        }

        let transaction_id = format!("mock_txn_{}", Uuid::new_v4().simple());
        tracing::info!(
            payment_id = %payment_id,
            amount = %amount,
            transaction_id = %transaction_id,
            "mock psp accepted charge"
        );

        Ok(PspAcceptance {
            raw: serde_json::json!({
                "transaction_id": transaction_id,
                "status": "processing",
            }),
            transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_accepts_by_default() {
        let psp = MockPsp::new();
        let acceptance = psp
            .charge(Uuid::new_v4(), Decimal::new(4200, 2))
            .await
            .unwrap();
        assert!(acceptance.transaction_id.starts_with("mock_txn_"));
    }

    #[tokio::test]
    async fn test_mock_fails_then_recovers() {
        let psp = MockPsp::failing_first(2);
        let id = Uuid::new_v4();
        let amount = Decimal::new(4200, 2);

        assert!(psp.charge(id, amount).await.is_err());
        assert!(psp.charge(id, amount).await.is_err());
        assert!(psp.charge(id, amount).await.is_ok());
        assert_eq!(psp.call_count(), 3);
    }
}
