//! Fast-path negative cache for repeat-scan storms.

use crate::error::Result;
use crate::types::{CachedOutcome, EventId, TicketId};
use async_trait::async_trait;
use std::time::Duration;

/// Bounded-lifetime cache of terminal negative outcomes per (ticket, scope).
///
/// Never authoritative: entries only short-circuit a denial, never grant
/// admission, and a missing or stale entry merely costs one extra trip to
/// the durable transaction. A fresh "not yet decided" ticket is never
/// cached, so every first-time scan reaches the authoritative store.
#[async_trait]
pub trait OutcomeCache: Send + Sync {
    /// Look up the cached outcome for a ticket under the given scope.
    ///
    /// `scope` is the expected event when the gate is event-scoped; callers
    /// without event context share a sentinel "all" scope.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::StoreUnavailable`] when the store
    /// is unreachable. Callers treat this as a miss.
    async fn get(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
    ) -> Result<Option<CachedOutcome>>;

    /// Record a terminal negative outcome with a bounded lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::StoreUnavailable`] when the store
    /// is unreachable. Callers log and continue; the durable transaction
    /// remains the only writer of truth.
    async fn put(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
        entry: &CachedOutcome,
        ttl: Duration,
    ) -> Result<()>;
}
