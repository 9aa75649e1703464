//! Per-device attempt ceiling, applied before any lock or transaction work.

use crate::error::Result;
use crate::types::{DeviceId, RateCheck};
use async_trait::async_trait;

/// Store-backed counter per scanning device over a rolling window.
///
/// The cheapest possible rejection: checked before the token is even
/// decoded. The window resets through the store's own key expiry.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Atomically record an attempt and report whether the device is over
    /// its ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::StoreUnavailable`] when the store
    /// is unreachable; the request fails closed.
    async fn check_and_record(&self, device_id: &DeviceId) -> Result<RateCheck>;

    /// Seconds until a limited device's window resets, surfaced as the
    /// retry-after hint.
    fn retry_after_secs(&self) -> u64;
}
