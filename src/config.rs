use std::env;
use std::time::Duration;

/// Application configuration parsed from environment variables
///
/// Every tunable of the dispatch loop, matcher, outbox pipeline and rate
/// limiter is surfaced here with its production default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,

    /// `redis` for production backends, `inmemory` for dev and tests
    pub backend: String,

    pub dispatch_poll_interval: Duration,
    pub dispatch_match_timeout: Duration,
    pub dispatch_batch_size: i64,
    pub dispatch_subbatch: usize,
    pub dispatch_max_age: Duration,

    pub match_radius_km: f64,
    pub match_limit: usize,

    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub payment_max_retries: i32,
    pub payment_retry_backoff: Vec<Duration>,

    pub idempotency_ttl: Duration,
    pub geo_freshness: Duration,
    pub driver_view_ttl: Duration,

    pub psp_base_url: String,
    pub psp_webhook_secret: String,
    pub psp_timeout: Duration,

    /// General API cap: requests per 15 minutes per client
    pub rate_general_per_15min: u32,
    /// Location updates per minute per driver
    pub rate_location_per_min: u32,
    /// Payment creations per 15 minutes per client
    pub rate_payment_per_15min: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8094".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let backend = env::var("DISPATCH_BACKEND").unwrap_or_else(|_| "redis".to_string());

        let payment_retry_backoff = env::var("PAYMENT_RETRY_BACKOFF_SECS")
            .unwrap_or_else(|_| "30,120,480".to_string())
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| format!("invalid PAYMENT_RETRY_BACKOFF_SECS entry: {}", s))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if payment_retry_backoff.is_empty() {
            return Err("PAYMENT_RETRY_BACKOFF_SECS must not be empty".to_string());
        }

        Ok(Config {
            database_url,
            redis_url,
            host,
            port,
            backend,

            dispatch_poll_interval: secs_env("DISPATCH_POLL_INTERVAL_SECS", 2)?,
            dispatch_match_timeout: secs_env("DISPATCH_MATCH_TIMEOUT_SECS", 60)?,
            dispatch_batch_size: int_env("DISPATCH_BATCH_SIZE", 10)?,
            dispatch_subbatch: int_env::<usize>("DISPATCH_SUBBATCH", 5)?,
            dispatch_max_age: secs_env("DISPATCH_MAX_AGE_SECS", 300)?,

            match_radius_km: float_env("MATCH_RADIUS_KM", 5.0)?,
            match_limit: int_env::<usize>("MATCH_LIMIT", 5)?,

            outbox_poll_interval: secs_env("OUTBOX_POLL_INTERVAL_SECS", 5)?,
            outbox_batch_size: int_env("OUTBOX_BATCH_SIZE", 10)?,
            payment_max_retries: int_env("PAYMENT_MAX_RETRIES", 3)?,
            payment_retry_backoff,

            idempotency_ttl: secs_env("IDEMPOTENCY_TTL_SECS", 300)?,
            geo_freshness: secs_env("GEO_FRESHNESS_SECS", 60)?,
            driver_view_ttl: secs_env("DRIVER_VIEW_TTL_SECS", 10)?,

            psp_base_url: env::var("PSP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9402".to_string()),
            psp_webhook_secret: env::var("PSP_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "whsec_dev_secret".to_string()),
            psp_timeout: secs_env("PSP_TIMEOUT_SECS", 10)?,

            rate_general_per_15min: int_env("RATE_GENERAL_PER_15MIN", 100)?,
            rate_location_per_min: int_env("RATE_LOCATION_PER_MIN", 120)?,
            rate_payment_per_15min: int_env("RATE_PAYMENT_PER_15MIN", 10)?,
        })
    }
}

fn secs_env(key: &str, default: u64) -> Result<Duration, String> {
    Ok(Duration::from_secs(int_env(key, default)?))
}

fn int_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid integer", key)),
        Err(_) => Ok(default),
    }
}

fn float_env(key: &str, default: f64) -> Result<f64, String> {
    match env::var(key) {
        Ok(v) => v
            .parse::<f64>()
            .map_err(|_| format!("{} must be a valid number", key)),
        Err(_) => Ok(default),
    }
}
