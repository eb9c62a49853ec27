//! # EventBus Abstraction
//!
//! The in-process publish/subscribe capability the dispatch core is built on.
//!
//! ## Why a platform crate
//!
//! The bus is a **shared runtime capability**: ride intake, the driver
//! registry, the assignment service and the live-event fan-out all publish
//! through it without depending on each other. Keeping it in `platform/`
//! lets every component take an `Arc<dyn EventBus>` handle from the
//! composition root instead of reaching for process-global state.
//!
//! ## Subjects
//!
//! Subjects are dot-separated, NATS-style:
//! `dispatch.events.<kind>.<verb>` (e.g. `dispatch.events.ride.created`).
//! Subscriptions accept the usual wildcards (`*` for one token, `>` for the
//! rest), so the live-event fan-out listens on `dispatch.events.>`.
//!
//! ## Usage
//!
//! ```rust
//! use event_bus::{EventBus, InMemoryBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//!
//! let mut stream = bus.subscribe("dispatch.events.>").await?;
//! bus.publish("dispatch.events.ride.created", b"{}".to_vec()).await?;
//!
//! let msg = stream.next().await.unwrap();
//! assert_eq!(msg.subject, "dispatch.events.ride.created");
//! # Ok(())
//! # }
//! ```

mod inmemory_bus;

pub use inmemory_bus::InMemoryBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes, JSON in practice)
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core publish-subscribe abstraction
///
/// Delivery is best-effort: publishing with no subscribers succeeds, and a
/// subscriber that cannot keep up loses the oldest messages rather than
/// blocking publishers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    ///
    /// `*` matches a single token, `>` matches one or more trailing tokens.
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
