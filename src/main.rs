use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use dispatch_rs::cache::{InMemoryKvCache, KvCache, RedisKvCache};
use dispatch_rs::config::Config;
use dispatch_rs::events::EventPublisher;
use dispatch_rs::fanout::{run_fanout, FanoutHub};
use dispatch_rs::geo::{GeoIndex, InMemoryGeoIndex, RedisGeoIndex};
use dispatch_rs::notify::{LogNotifier, Notifier};
use dispatch_rs::psp::{HttpPsp, MockPsp, PaymentProvider};
use dispatch_rs::routes::api_router;
use dispatch_rs::state::AppState;
use dispatch_rs::workers::dispatch::run_dispatch_worker;
use dispatch_rs::workers::location_writer::{run_location_writer, QUEUE_CAPACITY};
use dispatch_rs::workers::outbox::run_outbox_worker;
use event_bus::{EventBus, InMemoryBus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    tracing::info!("Connecting to database...");
    let pool = dispatch_rs::db::init_pool(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    // geo index + shared cache: redis in production, in-memory for dev
    let (geo, cache): (Arc<dyn GeoIndex>, Arc<dyn KvCache>) =
        match config.backend.to_lowercase().as_str() {
            "redis" => {
                tracing::info!("Connecting to Redis at {}", config.redis_url);
                let client =
                    redis::Client::open(config.redis_url.clone()).context("invalid REDIS_URL")?;
                let conn = redis::aio::ConnectionManager::new(client)
                    .await
                    .context("failed to connect to Redis")?;
                (
                    Arc::new(RedisGeoIndex::new(conn.clone(), config.geo_freshness)),
                    Arc::new(RedisKvCache::new(conn)),
                )
            }
            "inmemory" => {
                tracing::info!("Using in-memory geo index and cache");
                (
                    Arc::new(InMemoryGeoIndex::new(config.geo_freshness)),
                    Arc::new(InMemoryKvCache::new()),
                )
            }
            other => anyhow::bail!(
                "invalid DISPATCH_BACKEND: {}. Must be 'redis' or 'inmemory'",
                other
            ),
        };

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let publisher = EventPublisher::new(bus.clone());
    let fanout = FanoutHub::new();

    let psp: Arc<dyn PaymentProvider> = match std::env::var("PSP_MODE").as_deref() {
        Ok("mock") => {
            tracing::info!("Using mock payment provider");
            Arc::new(MockPsp::new())
        }
        _ => Arc::new(
            HttpPsp::new(config.psp_base_url.clone(), config.psp_timeout)
                .context("failed to build PSP client")?,
        ),
    };

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let (location_tx, location_rx) = mpsc::channel(QUEUE_CAPACITY);

    let state = AppState::new(
        pool.clone(),
        config.clone(),
        geo,
        cache,
        publisher,
        notifier,
        psp,
        fanout.clone(),
        location_tx,
    );

    // cooperative shutdown: workers observe the flag between iterations
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(run_dispatch_worker(state.clone(), shutdown_rx.clone()));
    tokio::spawn(run_outbox_worker(state.clone(), shutdown_rx.clone()));
    tokio::spawn(run_location_writer(
        pool.clone(),
        location_rx,
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_fanout(bus, fanout, shutdown_rx));

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let app = api_router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid HOST:PORT")?;

    tracing::info!("Dispatch core listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    // stop the workers once the server has drained
    let _ = shutdown_tx.send(true);
    tracing::info!("Dispatch core shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, shutting down");
        },
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down");
        },
    }
}
