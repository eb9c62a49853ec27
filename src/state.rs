//! Shared application state
//!
//! One context object, built by the composition root, threads every
//! collaborator handle through the services and handlers. Nothing in the
//! crate reaches for process-global state.

use crate::cache::KvCache;
use crate::config::Config;
use crate::events::EventPublisher;
use crate::fanout::FanoutHub;
use crate::geo::GeoIndex;
use crate::idempotency::IdempotencyStore;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::psp::PaymentProvider;
use crate::rate_limit::KeyedLimiters;
use crate::workers::location_writer::LocationUpdate;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub geo: Arc<dyn GeoIndex>,
    pub cache: Arc<dyn KvCache>,
    pub idempotency: IdempotencyStore,
    pub publisher: EventPublisher,
    pub notifier: Arc<dyn Notifier>,
    pub psp: Arc<dyn PaymentProvider>,
    pub limiters: KeyedLimiters,
    pub metrics: Metrics,
    pub fanout: FanoutHub,
    pub location_queue: mpsc::Sender<LocationUpdate>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        config: Config,
        geo: Arc<dyn GeoIndex>,
        cache: Arc<dyn KvCache>,
        publisher: EventPublisher,
        notifier: Arc<dyn Notifier>,
        psp: Arc<dyn PaymentProvider>,
        fanout: FanoutHub,
        location_queue: mpsc::Sender<LocationUpdate>,
    ) -> Self {
        let idempotency = IdempotencyStore::new(cache.clone(), config.idempotency_ttl);
        let limiters = KeyedLimiters::new(
            config.rate_general_per_15min,
            config.rate_location_per_min,
            config.rate_payment_per_15min,
        );

        Self {
            pool,
            config,
            geo,
            cache,
            idempotency,
            publisher,
            notifier,
            psp,
            limiters,
            metrics: Metrics::new(),
            fanout,
            location_queue,
        }
    }
}
