//! Error types for the admission core.
//!
//! Business-rule outcomes are [`crate::types::Decision`] values and never
//! appear here. `GateError` covers infrastructure failures only, and every
//! one of them fails the request closed: a store outage denies admission, it
//! never degrades into an unguarded grant.

use thiserror::Error;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Infrastructure failure taxonomy.
#[derive(Debug, Error)]
pub enum GateError {
    /// The lock/cache store is unreachable. Fail closed; the scanner may
    /// retry shortly.
    #[error("lock/cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// Durable storage failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable error code surfaced to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller should retry after a short delay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for GateError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
