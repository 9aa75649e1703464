//! Redis-backed per-device rate limiter.
//!
//! A plain counter per device with the window enforced by key expiry. The
//! increment and the first-attempt expiry are one Lua step, so concurrent
//! first attempts cannot leave an immortal counter behind.

use crate::error::{GateError, Result};
use crate::providers::RateLimiter;
use crate::types::{DeviceId, RateCheck};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

const RATE_PREFIX: &str = "rate:scan:";

/// INCR, then set the window expiry only when this was the first attempt.
const COUNT_SCRIPT: &str = r#"
local count = redis.call("incr", KEYS[1])
if count == 1 then
  redis.call("expire", KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed sliding counter per scanning device.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn_manager: ConnectionManager,
    max_per_window: u64,
    window: Duration,
}

impl RedisRateLimiter {
    /// Connect to Redis and build the limiter.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::StoreUnavailable`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str, max_per_window: u64, window: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| GateError::StoreUnavailable(format!("redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| GateError::StoreUnavailable(format!("redis connection: {e}")))?;
        Ok(Self {
            conn_manager,
            max_per_window,
            window,
        })
    }

    /// Build over an existing connection manager.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, max_per_window: u64, window: Duration) -> Self {
        Self {
            conn_manager,
            max_per_window,
            window,
        }
    }

    fn rate_key(device_id: &DeviceId) -> String {
        format!("{RATE_PREFIX}{device_id}")
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check_and_record(&self, device_id: &DeviceId) -> Result<RateCheck> {
        let mut conn = self.conn_manager.clone();
        let key = Self::rate_key(device_id);

        let attempts: u64 = redis::Script::new(COUNT_SCRIPT)
            .key(&key)
            .arg(self.window.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        let limited = attempts > self.max_per_window;
        if limited {
            tracing::warn!(
                device_id = %device_id,
                attempts,
                max = self.max_per_window,
                window_secs = self.window.as_secs(),
                "Device over scan rate ceiling"
            );
        }
        Ok(RateCheck { attempts, limited })
    }

    fn retry_after_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    // These tests require a running Redis instance.

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn ceiling_trips_after_max_attempts() {
        let limiter = RedisRateLimiter::connect(
            "redis://127.0.0.1:6379",
            3,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let device = DeviceId::new(format!("scanner-{}", uuid::Uuid::new_v4()));

        for i in 1..=3 {
            let check = limiter.check_and_record(&device).await.unwrap();
            assert!(!check.limited, "attempt {i} should pass");
        }
        let check = limiter.check_and_record(&device).await.unwrap();
        assert!(check.limited);
        assert_eq!(check.attempts, 4);
    }
}
