//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::scan;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Health/readiness checks
/// - Scan endpoints under `/api/scan`
pub fn build_router(state: AppState) -> Router {
    let scan_routes = Router::new()
        .route("/verify", post(scan::verify))
        .route("/validate", post(scan::validate))
        .route("/history", post(scan::history))
        .route("/stats/:event_id", get(scan::event_stats));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/scan", scan_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
