//! Redis-backed ticket lock.
//!
//! Acquisition is a single `SET key token PX ttl NX`; release is a Lua
//! compare-and-delete so the ownership check and the deletion happen in one
//! atomic step on the server.

use crate::error::{GateError, Result};
use crate::providers::TicketLock;
use crate::types::{LockToken, TicketId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

const LOCK_PREFIX: &str = "lock:ticket:";

/// Compare-and-delete: delete the key only when the caller still owns it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end
"#;

/// Redis-backed distributed lock with a bounded lease.
///
/// The TTL is long enough to cover one durable transaction and short enough
/// that a crashed holder never blocks a ticket for more than that window.
#[derive(Clone)]
pub struct RedisTicketLock {
    conn_manager: ConnectionManager,
    ttl: Duration,
}

impl RedisTicketLock {
    /// Connect to Redis and build the lock coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::StoreUnavailable`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::StoreUnavailable(format!("redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GateError::StoreUnavailable(format!("redis connection: {e}")))?;
        Ok(Self { conn_manager, ttl })
    }

    /// Build over an existing connection manager.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, ttl: Duration) -> Self {
        Self { conn_manager, ttl }
    }

    fn lock_key(ticket_id: &TicketId) -> String {
        format!("{LOCK_PREFIX}{ticket_id}")
    }
}

#[async_trait]
impl TicketLock for RedisTicketLock {
    async fn acquire(&self, ticket_id: &TicketId) -> Result<Option<LockToken>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::lock_key(ticket_id);
        let token = uuid::Uuid::new_v4().to_string();
        #[allow(clippy::cast_possible_truncation)]
        let ttl_ms = self.ttl.as_millis() as u64;

        // SET NX PX: atomic take-if-absent with the lease baked in.
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                tracing::debug!(ticket_id = %ticket_id, ttl_ms, "Acquired ticket lock");
                Ok(Some(LockToken::new(token)))
            }
            None => {
                tracing::debug!(ticket_id = %ticket_id, "Ticket lock held elsewhere");
                Ok(None)
            }
        }
    }

    async fn release(&self, ticket_id: &TicketId, token: &LockToken) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let key = Self::lock_key(ticket_id);

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;

        if deleted == 1 {
            tracing::debug!(ticket_id = %ticket_id, "Released ticket lock");
        } else {
            tracing::debug!(ticket_id = %ticket_id, "Lock no longer owned, nothing released");
        }
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::providers::TicketLock;

    // These tests require a running Redis instance.
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    fn ticket() -> TicketId {
        TicketId::new(format!("ORD-LOCK-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn acquire_is_exclusive_until_released() {
        let lock = RedisTicketLock::connect("redis://127.0.0.1:6379", Duration::from_secs(5))
            .await
            .unwrap();
        let ticket = ticket();

        let token = lock.acquire(&ticket).await.unwrap().unwrap();
        assert!(lock.acquire(&ticket).await.unwrap().is_none());

        assert!(lock.release(&ticket, &token).await.unwrap());
        assert!(lock.acquire(&ticket).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn foreign_token_never_releases() {
        let lock = RedisTicketLock::connect("redis://127.0.0.1:6379", Duration::from_secs(5))
            .await
            .unwrap();
        let ticket = ticket();

        let token = lock.acquire(&ticket).await.unwrap().unwrap();
        let foreign = LockToken::new(uuid::Uuid::new_v4().to_string());

        assert!(!lock.release(&ticket, &foreign).await.unwrap());
        // Original holder still owns the lock.
        assert!(lock.acquire(&ticket).await.unwrap().is_none());
        assert!(lock.release(&ticket, &token).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn lease_expires_on_its_own() {
        let lock = RedisTicketLock::connect("redis://127.0.0.1:6379", Duration::from_millis(200))
            .await
            .unwrap();
        let ticket = ticket();

        let _token = lock.acquire(&ticket).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(lock.acquire(&ticket).await.unwrap().is_some());
    }
}
