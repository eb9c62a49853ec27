//! Geospatial driver index
//!
//! A sorted geospatial set of AVAILABLE drivers, authoritative for matching
//! candidacy only; the store stays authoritative for driver status. Entries
//! carry a companion freshness key: a driver that has not reported a
//! location inside the freshness window is considered stale and is swept by
//! the registry on its next status transition.
//!
//! `RedisGeoIndex` keeps the set in Redis (`GEOADD`/`GEORADIUS`) so every
//! dispatch instance sees the same candidates; `InMemoryGeoIndex` computes
//! great-circle distances over a local map for dev and tests.

use crate::errors::DispatchResult;
use crate::models::Candidate;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::geo::{Coord, RadiusOptions, RadiusOrder, RadiusSearchResult, Unit};
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use uuid::Uuid;

const GEO_KEY: &str = "drivers:geo";

#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Add or move a driver's position and refresh its freshness key
    async fn upsert(&self, driver_id: Uuid, lon: f64, lat: f64) -> DispatchResult<()>;

    /// Remove a driver from the index (going OFFLINE or ON_TRIP)
    async fn remove(&self, driver_id: Uuid) -> DispatchResult<()>;

    /// Members within `radius_km` of the point, closest first, capped at `limit`
    async fn search_nearby(
        &self,
        lon: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> DispatchResult<Vec<Candidate>>;

    /// Drop the driver's entry if its freshness window has lapsed.
    /// Returns whether a stale entry was removed.
    async fn sweep_if_stale(&self, driver_id: Uuid) -> DispatchResult<bool>;
}

fn freshness_key(driver_id: Uuid) -> String {
    format!("drivers:geo:fresh:{}", driver_id)
}

/// Redis-backed geospatial index shared across dispatch instances
#[derive(Clone)]
pub struct RedisGeoIndex {
    conn: ConnectionManager,
    freshness: Duration,
}

impl RedisGeoIndex {
    pub fn new(conn: ConnectionManager, freshness: Duration) -> Self {
        Self { conn, freshness }
    }
}

#[async_trait]
impl GeoIndex for RedisGeoIndex {
    async fn upsert(&self, driver_id: Uuid, lon: f64, lat: f64) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let member = driver_id.to_string();

        let _: i64 = conn
            .geo_add(GEO_KEY, (Coord::lon_lat(lon, lat), member))
            .await?;
        let () = conn
            .set_ex(freshness_key(driver_id), 1, self.freshness.as_secs().max(1))
            .await?;

        Ok(())
    }

    async fn remove(&self, driver_id: Uuid) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(GEO_KEY, driver_id.to_string()).await?;
        let () = conn.del(freshness_key(driver_id)).await?;
        Ok(())
    }

    async fn search_nearby(
        &self,
        lon: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> DispatchResult<Vec<Candidate>> {
        let mut conn = self.conn.clone();

        let opts = RadiusOptions::default()
            .with_dist()
            .order(RadiusOrder::Asc)
            .limit(limit);

        let results: Vec<RadiusSearchResult> = conn
            .geo_radius(GEO_KEY, lon, lat, radius_km, Unit::Kilometers, opts)
            .await?;

        let candidates = results
            .into_iter()
            .filter_map(|r| {
                let driver_id = Uuid::parse_str(&r.name).ok()?;
                Some(Candidate {
                    driver_id,
                    distance_km: r.dist.unwrap_or(0.0),
                })
            })
            .collect();

        Ok(candidates)
    }

    async fn sweep_if_stale(&self, driver_id: Uuid) -> DispatchResult<bool> {
        let mut conn = self.conn.clone();

        let fresh: Option<String> = conn.get(freshness_key(driver_id)).await?;
        if fresh.is_some() {
            return Ok(false);
        }

        let removed: i64 = conn.zrem(GEO_KEY, driver_id.to_string()).await?;
        Ok(removed > 0)
    }
}

/// In-process index for dev and tests
pub struct InMemoryGeoIndex {
    positions: DashMap<Uuid, (f64, f64, Instant)>,
    freshness: Duration,
}

impl InMemoryGeoIndex {
    pub fn new(freshness: Duration) -> Self {
        Self {
            positions: DashMap::new(),
            freshness,
        }
    }
}

/// Great-circle distance in kilometres
fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn upsert(&self, driver_id: Uuid, lon: f64, lat: f64) -> DispatchResult<()> {
        self.positions.insert(driver_id, (lon, lat, Instant::now()));
        Ok(())
    }

    async fn remove(&self, driver_id: Uuid) -> DispatchResult<()> {
        self.positions.remove(&driver_id);
        Ok(())
    }

    async fn search_nearby(
        &self,
        lon: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> DispatchResult<Vec<Candidate>> {
        let mut candidates: Vec<Candidate> = self
            .positions
            .iter()
            .filter_map(|entry| {
                let (d_lon, d_lat, _) = *entry.value();
                let distance_km = haversine_km(lon, lat, d_lon, d_lat);
                (distance_km <= radius_km).then_some(Candidate {
                    driver_id: *entry.key(),
                    distance_km,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);

        Ok(candidates)
    }

    async fn sweep_if_stale(&self, driver_id: Uuid) -> DispatchResult<bool> {
        let stale = self
            .positions
            .get(&driver_id)
            .map(|entry| entry.value().2.elapsed() > self.freshness)
            .unwrap_or(false);

        if stale {
            self.positions.remove(&driver_id);
        }
        Ok(stale)
    }
}
