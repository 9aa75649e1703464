//! Application state for the HTTP server.

use crate::service::AdmissionService;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request. The optional store handles are
/// only used by the readiness probe; mock-wired servers in tests leave them
/// unset.
#[derive(Clone)]
pub struct AppState {
    /// The scan verification pipeline
    pub service: Arc<AdmissionService>,

    /// Redis handle for readiness checks
    pub redis: Option<ConnectionManager>,

    /// `PostgreSQL` pool for readiness checks
    pub postgres: Option<Arc<PgPool>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        service: Arc<AdmissionService>,
        redis: Option<ConnectionManager>,
        postgres: Option<Arc<PgPool>>,
    ) -> Self {
        Self {
            service,
            redis,
            postgres,
        }
    }

    /// State wired to in-memory providers, without store handles.
    #[must_use]
    pub fn for_testing(service: Arc<AdmissionService>) -> Self {
        Self {
            service,
            redis: None,
            postgres: None,
        }
    }
}
