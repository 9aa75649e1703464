//! Gate admission server.
//!
//! This binary:
//! - Connects to `PostgreSQL` (orders, events, scan records) and applies the
//!   schema
//! - Connects to Redis (ticket locks, outcome cache, rate counters)
//! - Wires the admission pipeline and serves the scan API
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin server
//! ```

use gatecheck::server::{AppState, build_router};
use gatecheck::stores::{
    PostgresAdmissionStore, PostgresScanAuditor, RedisOutcomeCache, RedisRateLimiter,
    RedisTicketLock, ensure_schema,
};
use gatecheck::{AdmissionService, Config, TokenCodec};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gatecheck=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting gate admission server...");

    let config = Config::from_env();
    tracing::info!(
        postgres = %config.postgres.url,
        redis = %config.redis.url,
        "Configuration loaded"
    );

    // Durable store
    let pool = Arc::new(
        PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?,
    );
    ensure_schema(&pool).await?;
    tracing::info!("PostgreSQL connected, schema ensured");

    // Lock/cache/rate store
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = ConnectionManager::new(redis_client).await?;
    tracing::info!("Redis connected");

    let service = Arc::new(AdmissionService::new(
        TokenCodec::new(config.scan.secret.as_bytes().to_vec()),
        Arc::new(RedisTicketLock::new(
            redis_conn.clone(),
            config.scan.lock_ttl(),
        )),
        Arc::new(RedisOutcomeCache::new(redis_conn.clone())),
        Arc::new(RedisRateLimiter::new(
            redis_conn.clone(),
            config.scan.rate_limit_max,
            config.scan.rate_limit_window(),
        )),
        Arc::new(PostgresAdmissionStore::new(Arc::clone(&pool))),
        Arc::new(PostgresScanAuditor::new(Arc::clone(&pool))),
        config.scan.cache_ttl(),
    ));

    let state = AppState::new(service, Some(redis_conn), Some(pool));
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Gate admission server is running");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down gracefully...");
        })
        .await?;

    Ok(())
}
