//! Write-behind store writer for driver locations
//!
//! The location fast path answers from the geo index alone; store writes
//! flow through a bounded queue into this worker. Samples are coalesced
//! per driver with last-write-wins before hitting the store, so a burst of
//! updates for one driver costs one UPDATE. Store failures are logged and
//! the samples dropped; locations are time-decaying data.

use crate::repos::driver_repo;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub const QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct LocationUpdate {
    pub driver_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub observed_at: DateTime<Utc>,
}

/// Drain loop: runs until the queue closes or shutdown flips
pub async fn run_location_writer(
    pool: PgPool,
    mut queue: mpsc::Receiver<LocationUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("location writer started");

    loop {
        let first = tokio::select! {
            update = queue.recv() => match update {
                Some(update) => update,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        // coalesce whatever else is already queued, newest sample wins
        let mut batch: HashMap<Uuid, LocationUpdate> = HashMap::new();
        batch.insert(first.driver_id, first);
        while let Ok(update) = queue.try_recv() {
            let entry = batch.entry(update.driver_id).or_insert_with(|| update.clone());
            if update.observed_at >= entry.observed_at {
                *entry = update;
            }
        }

        for update in batch.into_values() {
            if let Err(e) = driver_repo::update_location(
                &pool,
                update.driver_id,
                update.lat,
                update.lon,
                update.observed_at,
            )
            .await
            {
                tracing::warn!(
                    driver_id = %update.driver_id,
                    error = %e,
                    "location store write failed, sample dropped"
                );
            }
        }
    }

    tracing::info!("location writer stopped");
}
