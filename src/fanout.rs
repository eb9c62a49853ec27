//! Live-event fan-out
//!
//! Aggregates every `dispatch.events.>` envelope from the bus and forwards
//! it to all currently registered subscribers. Subscribers are transport
//! handles (the WebSocket layer lives outside this crate); delivery is
//! best-effort and a subscriber whose channel is full simply misses that
//! message.

use dashmap::DashMap;
use event_bus::EventBus;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const SUBSCRIBER_BUFFER: usize = 256;

/// Handle returned to a registered subscriber
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<String>,
}

/// Registry of live subscribers fed by the bus forwarding task
#[derive(Clone, Default)]
pub struct FanoutHub {
    subscribers: Arc<DashMap<Uuid, mpsc::Sender<String>>>,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and hand back its receiving end
    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        tracing::debug!(subscriber_id = %id, "live-event subscriber registered");
        Subscription { id, receiver: rx }
    }

    /// Drop a subscriber; its channel closes
    pub fn unregister(&self, id: Uuid) {
        self.subscribers.remove(&id);
        tracing::debug!(subscriber_id = %id, "live-event subscriber unregistered");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Forward one serialized envelope to every subscriber
    fn broadcast(&self, envelope: &str) {
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(envelope.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber_id = %entry.key(), "subscriber lagging, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
        }
    }
}

/// Forwarding loop: bus -> subscribers. Runs until the shutdown signal flips.
pub async fn run_fanout(
    bus: Arc<dyn EventBus>,
    hub: FanoutHub,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream = match bus.subscribe("dispatch.events.>").await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "fan-out failed to subscribe to bus");
            return;
        }
    };

    tracing::info!("live-event fan-out started");

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(msg) => match String::from_utf8(msg.payload) {
                        Ok(envelope) => hub.broadcast(&envelope),
                        Err(e) => {
                            tracing::warn!(subject = %msg.subject, error = %e, "non-utf8 event payload dropped");
                        }
                    },
                    None => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("live-event fan-out stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainEvent, EventPublisher};
    use event_bus::InMemoryBus;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let hub = FanoutHub::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut sub = hub.register();
        tokio::spawn(run_fanout(bus.clone(), hub.clone(), shutdown_rx));
        // let the forwarding task subscribe before publishing
        tokio::time::sleep(Duration::from_millis(20)).await;

        let publisher = EventPublisher::new(bus);
        publisher
            .publish(DomainEvent::DriverAssigned {
                ride_id: Uuid::new_v4(),
                driver_id: Uuid::new_v4(),
            })
            .await;

        let envelope = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        let value: serde_json::Value = serde_json::from_str(&envelope).unwrap();
        assert_eq!(value["type"], "DRIVER_ASSIGNED");

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let hub = FanoutHub::new();
        let sub = hub.register();
        assert_eq!(hub.subscriber_count(), 1);

        hub.unregister(sub.id);
        assert_eq!(hub.subscriber_count(), 0);

        // broadcasting to nobody is fine
        hub.broadcast("{}");
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let hub = FanoutHub::new();
        let sub = hub.register();
        drop(sub.receiver);

        hub.broadcast("{}");
        assert_eq!(hub.subscriber_count(), 0);
    }
}
