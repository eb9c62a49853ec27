//! Typed domain events and the post-commit publisher
//!
//! Components emit a `DomainEvent` value, never a hand-built JSON blob. The
//! publisher serializes the `{type, payload}` envelope and pushes it onto
//! the in-process bus under a `dispatch.events.<kind>.<verb>` subject, where
//! the live-event fan-out picks it up.
//!
//! Publishing happens after the owning transaction commits and is
//! best-effort: a bus failure is logged, never surfaced to the caller.

use crate::models::{Driver, Payment, Receipt, Ride, Trip};
use event_bus::EventBus;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum DomainEvent {
    #[serde(rename = "RIDE_CREATED")]
    RideCreated(Ride),
    #[serde(rename = "RIDE_UPDATED")]
    RideUpdated(Ride),
    #[serde(rename = "DRIVER_CREATED")]
    DriverCreated(Driver),
    #[serde(rename = "DRIVER_STATUS_CHANGED")]
    DriverStatusChanged(Driver),
    #[serde(rename = "DRIVER_LOCATION_UPDATED")]
    DriverLocationUpdated {
        driver_id: Uuid,
        lat: f64,
        lon: f64,
    },
    #[serde(rename = "DRIVER_ASSIGNED")]
    DriverAssigned { ride_id: Uuid, driver_id: Uuid },
    #[serde(rename = "TRIP_ACCEPTED")]
    TripAccepted(Trip),
    #[serde(rename = "TRIP_STARTED")]
    TripStarted(Trip),
    #[serde(rename = "TRIP_ENDED")]
    TripEnded(Trip),
    #[serde(rename = "TRIP_RECEIPT")]
    TripReceipt(Box<Receipt>),
    #[serde(rename = "PAYMENT_COMPLETED")]
    PaymentCompleted(Payment),
    #[serde(rename = "PAYMENT_FAILED")]
    PaymentFailed(Payment),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RideCreated(_) => "RIDE_CREATED",
            Self::RideUpdated(_) => "RIDE_UPDATED",
            Self::DriverCreated(_) => "DRIVER_CREATED",
            Self::DriverStatusChanged(_) => "DRIVER_STATUS_CHANGED",
            Self::DriverLocationUpdated { .. } => "DRIVER_LOCATION_UPDATED",
            Self::DriverAssigned { .. } => "DRIVER_ASSIGNED",
            Self::TripAccepted(_) => "TRIP_ACCEPTED",
            Self::TripStarted(_) => "TRIP_STARTED",
            Self::TripEnded(_) => "TRIP_ENDED",
            Self::TripReceipt(_) => "TRIP_RECEIPT",
            Self::PaymentCompleted(_) => "PAYMENT_COMPLETED",
            Self::PaymentFailed(_) => "PAYMENT_FAILED",
        }
    }

    /// Bus subject this event is published under
    pub fn subject(&self) -> &'static str {
        match self {
            Self::RideCreated(_) => "dispatch.events.ride.created",
            Self::RideUpdated(_) => "dispatch.events.ride.updated",
            Self::DriverCreated(_) => "dispatch.events.driver.created",
            Self::DriverStatusChanged(_) => "dispatch.events.driver.status_changed",
            Self::DriverLocationUpdated { .. } => "dispatch.events.driver.location_updated",
            Self::DriverAssigned { .. } => "dispatch.events.driver.assigned",
            Self::TripAccepted(_) => "dispatch.events.trip.accepted",
            Self::TripStarted(_) => "dispatch.events.trip.started",
            Self::TripEnded(_) => "dispatch.events.trip.ended",
            Self::TripReceipt(_) => "dispatch.events.trip.receipt",
            Self::PaymentCompleted(_) => "dispatch.events.payment.completed",
            Self::PaymentFailed(_) => "dispatch.events.payment.failed",
        }
    }
}

/// Handle services use to emit events after their transaction commits
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(event_type = event.event_type(), error = %e, "failed to encode event");
                return;
            }
        };

        if let Err(e) = self.bus.publish(subject, payload).await {
            tracing::error!(subject, error = %e, "failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryBus;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_envelope_shape() {
        let event = DomainEvent::DriverAssigned {
            ride_id: Uuid::nil(),
            driver_id: Uuid::nil(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "DRIVER_ASSIGNED");
        assert_eq!(
            value["payload"]["ride_id"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_wildcard_subscriber() {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = EventPublisher::new(bus.clone());

        let mut stream = bus.subscribe("dispatch.events.>").await.unwrap();

        publisher
            .publish(DomainEvent::DriverLocationUpdated {
                driver_id: Uuid::nil(),
                lat: 37.7749,
                lon: -122.4194,
            })
            .await;

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(msg.subject, "dispatch.events.driver.location_updated");
        let value: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(value["type"], "DRIVER_LOCATION_UPDATED");
    }
}
