//! Health check endpoints.
//!
//! `/health` is a plain liveness check; `/ready` verifies the stores the
//! admission pipeline depends on.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Health check endpoint.
///
/// Returns 200 OK if the service is running. Does not verify dependencies.
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
    /// Database connectivity
    pub database: bool,
    /// Redis connectivity
    pub redis: bool,
}

/// Readiness check endpoint.
///
/// Returns 200 OK when both stores answer; 503 otherwise, so a partitioned
/// instance is pulled from rotation instead of failing scans closed one by
/// one. Stores that are not wired (mock setups) count as ready.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let redis = match &state.redis {
        Some(conn) => {
            let mut conn = conn.clone();
            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok()
        }
        None => true,
    };
    let database = match &state.postgres {
        Some(pool) => sqlx::query("SELECT 1").execute(pool.as_ref()).await.is_ok(),
        None => true,
    };

    let ready = redis && database;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            redis,
        }),
    )
}
