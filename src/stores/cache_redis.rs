//! Redis-backed outcome cache.
//!
//! Entries are JSON under `scan:cache:{ticket}:{scope}` with the lifetime
//! enforced by Redis expiry. Unparseable entries count as misses.

use crate::error::{GateError, Result};
use crate::providers::OutcomeCache;
use crate::types::{CachedOutcome, EventId, TicketId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

const SCAN_CACHE_PREFIX: &str = "scan:cache:";
const ALL_SCOPE: &str = "all";

/// Redis-backed negative-outcome cache.
#[derive(Clone)]
pub struct RedisOutcomeCache {
    conn_manager: ConnectionManager,
}

impl RedisOutcomeCache {
    /// Connect to Redis and build the cache.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::StoreUnavailable`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::StoreUnavailable(format!("redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GateError::StoreUnavailable(format!("redis connection: {e}")))?;
        Ok(Self { conn_manager })
    }

    /// Build over an existing connection manager.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn cache_key(ticket_id: &TicketId, scope: Option<&EventId>) -> String {
        let scope = scope.map_or(ALL_SCOPE, EventId::as_str);
        format!("{SCAN_CACHE_PREFIX}{ticket_id}:{scope}")
    }
}

#[async_trait]
impl OutcomeCache for RedisOutcomeCache {
    async fn get(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
    ) -> Result<Option<CachedOutcome>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cache_key(ticket_id, scope);

        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedOutcome>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
        entry: &CachedOutcome,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::cache_key(ticket_id, scope);
        let payload = serde_json::to_string(entry)?;

        let _: () = conn.set_ex(&key, payload, ttl.as_secs().max(1)).await?;
        tracing::debug!(
            key = %key,
            outcome = entry.outcome.as_str(),
            ttl_secs = ttl.as_secs(),
            "Cached terminal outcome"
        );
        Ok(())
    }
}
