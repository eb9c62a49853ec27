//! In-memory implementation of the EventBus trait
//!
//! The dispatch core runs its bus in-process; the transport layer that fans
//! events out to the network lives behind the live-event subscriber API, not
//! behind the bus itself. This is therefore the production implementation,
//! not just a test double.

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus implementation using Tokio broadcast channels
///
/// Every message goes through one broadcast channel; subscribers filter by
/// subject pattern on their side. A slow subscriber that falls behind the
/// channel capacity loses the oldest messages (`Lagged`) and keeps going.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a bus with the default capacity of 1024 buffered messages
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a bus with a custom buffer capacity
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check whether a concrete subject matches a subscription pattern
    ///
    /// NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more trailing tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            match pattern_tokens[p_idx] {
                ">" => return true,
                "*" => {
                    s_idx += 1;
                    p_idx += 1;
                }
                token if token == subject_tokens[s_idx] => {
                    s_idx += 1;
                    p_idx += 1;
                }
                _ => return false,
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let msg = BusMessage::new(subject.to_string(), payload);

        // send() errs only when there are no receivers, which is fine
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "bus subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_pattern_matching() {
        assert!(InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "dispatch.events.ride.created"
        ));

        // single wildcard
        assert!(InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "dispatch.*.ride.created"
        ));
        assert!(InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "dispatch.events.*.created"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "dispatch.*.created"
        ));

        // multi-level wildcard
        assert!(InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "dispatch.>"
        ));
        assert!(InMemoryBus::matches_pattern(
            "dispatch.events.driver.status_changed",
            "dispatch.events.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "dispatch.events.ride.created",
            "billing.>"
        ));

        // edge cases
        assert!(InMemoryBus::matches_pattern("single", "single"));
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("dispatch.events.>").await.unwrap();

        let payload = b"{\"type\":\"RIDE_CREATED\"}".to_vec();
        bus.publish("dispatch.events.ride.created", payload.clone())
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "dispatch.events.ride.created");
        assert_eq!(msg.payload, payload);
    }

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("dispatch.>").await.unwrap();

        for i in 0..5 {
            bus.publish(
                &format!("dispatch.events.trip.{}", i),
                format!("msg {}", i).into_bytes(),
            )
            .await
            .unwrap();
        }

        for i in 0..5 {
            let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
                .await
                .expect("timeout")
                .expect("stream ended");

            assert_eq!(msg.subject, format!("dispatch.events.trip.{}", i));
        }
    }

    #[tokio::test]
    async fn test_wildcard_filtering() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("dispatch.events.ride.*").await.unwrap();

        bus.publish("dispatch.events.ride.created", b"match".to_vec())
            .await
            .unwrap();
        bus.publish("dispatch.events.driver.created", b"no match".to_vec())
            .await
            .unwrap();
        bus.publish("dispatch.events.ride.updated", b"match".to_vec())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg1.subject, "dispatch.events.ride.created");

        let msg2 = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        assert_eq!(msg2.subject, "dispatch.events.ride.updated");

        let result = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(result.is_err(), "should timeout, no more messages");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_a_copy() {
        let bus = InMemoryBus::new();

        let mut stream1 = bus.subscribe("dispatch.>").await.unwrap();
        let mut stream2 = bus.subscribe("dispatch.>").await.unwrap();

        let payload = b"broadcast".to_vec();
        bus.publish("dispatch.events.payment.completed", payload.clone())
            .await
            .unwrap();

        let msg1 = tokio::time::timeout(Duration::from_secs(1), stream1.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        let msg2 = tokio::time::timeout(Duration::from_secs(1), stream2.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg1.payload, payload);
        assert_eq!(msg2.payload, payload);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        bus.publish("dispatch.events.ride.created", b"nobody listening".to_vec())
            .await
            .unwrap();
    }
}
