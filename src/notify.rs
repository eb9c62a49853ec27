//! Rider and driver notifications
//!
//! The push-notification service is an external collaborator; messages are
//! fire-and-forget. `LogNotifier` stands in for the real transport and is
//! what ships unless one is wired in at the composition root.

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message to a rider; delivery is best-effort
    async fn notify_rider(&self, rider_id: Uuid, message: &str);

    /// Send a message to a driver; delivery is best-effort
    async fn notify_driver(&self, driver_id: Uuid, message: &str);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_rider(&self, rider_id: Uuid, message: &str) {
        tracing::info!(rider_id = %rider_id, message, "rider notification");
    }

    async fn notify_driver(&self, driver_id: Uuid, message: &str) {
        tracing::info!(driver_id = %driver_id, message, "driver notification");
    }
}
