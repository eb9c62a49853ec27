//! Keyed rate limiting at the system boundary
//!
//! Three independent caps: a general per-client budget, a per-driver
//! location-update budget, and a per-client payment-creation budget.
//! Limiters are created lazily per key and kept in memory.

use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Clone)]
pub struct KeyedLimiters {
    general: Arc<DashMap<String, Limiter>>,
    location: Arc<DashMap<String, Limiter>>,
    payment: Arc<DashMap<String, Limiter>>,

    general_per_15min: u32,
    location_per_min: u32,
    payment_per_15min: u32,
}

impl KeyedLimiters {
    pub fn new(general_per_15min: u32, location_per_min: u32, payment_per_15min: u32) -> Self {
        Self {
            general: Arc::new(DashMap::new()),
            location: Arc::new(DashMap::new()),
            payment: Arc::new(DashMap::new()),
            general_per_15min,
            location_per_min,
            payment_per_15min,
        }
    }

    fn limiter_for(map: &DashMap<String, Limiter>, key: &str, quota: Quota) -> Limiter {
        if let Some(v) = map.get(key) {
            return v.clone();
        }

        let limiter = Arc::new(RateLimiter::direct(quota));
        map.insert(key.to_string(), limiter.clone());
        limiter
    }

    fn burst_quota(count: u32, window: Duration) -> Quota {
        let count = NonZeroU32::new(count.max(1)).expect("max(1) is non-zero");
        // replenish one permit per window/count, allow the full window as burst
        let replenish = window / count.get();
        Quota::with_period(replenish)
            .unwrap_or_else(|| Quota::per_minute(count))
            .allow_burst(count)
    }

    /// General API budget: per-client, 15-minute window
    pub fn check_general(&self, client: &str) -> Result<(), Duration> {
        let quota = Self::burst_quota(self.general_per_15min, Duration::from_secs(900));
        let limiter = Self::limiter_for(&self.general, client, quota);
        limiter
            .check()
            .map_err(|n| n.wait_time_from(DefaultClock::default().now()))
    }

    /// Location updates: per-driver, 1-minute window
    pub fn check_location(&self, driver_key: &str) -> Result<(), Duration> {
        let quota = Self::burst_quota(self.location_per_min, Duration::from_secs(60));
        let limiter = Self::limiter_for(&self.location, driver_key, quota);
        limiter
            .check()
            .map_err(|n| n.wait_time_from(DefaultClock::default().now()))
    }

    /// Payment creation: per-client, 15-minute window
    pub fn check_payment(&self, client: &str) -> Result<(), Duration> {
        let quota = Self::burst_quota(self.payment_per_15min, Duration::from_secs(900));
        let limiter = Self::limiter_for(&self.payment, client, quota);
        limiter
            .check()
            .map_err(|n| n.wait_time_from(DefaultClock::default().now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhausts_then_rejects() {
        let limiters = KeyedLimiters::new(100, 3, 10);

        for _ in 0..3 {
            assert!(limiters.check_location("driver-1").is_ok());
        }
        assert!(limiters.check_location("driver-1").is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiters = KeyedLimiters::new(100, 2, 10);

        assert!(limiters.check_location("driver-a").is_ok());
        assert!(limiters.check_location("driver-a").is_ok());
        assert!(limiters.check_location("driver-a").is_err());

        // a different driver still has budget
        assert!(limiters.check_location("driver-b").is_ok());
    }

    #[test]
    fn test_scopes_are_independent() {
        let limiters = KeyedLimiters::new(100, 1, 1);

        assert!(limiters.check_location("k").is_ok());
        assert!(limiters.check_location("k").is_err());

        // same key, different scope
        assert!(limiters.check_payment("k").is_ok());
        assert!(limiters.check_general("k").is_ok());
    }
}
