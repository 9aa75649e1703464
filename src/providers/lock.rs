//! Distributed mutual-exclusion lock keyed by ticket identifier.

use crate::error::Result;
use crate::types::{LockToken, TicketId};
use async_trait::async_trait;

/// Short-lived, ownership-checked lock over one ticket identifier.
///
/// The lock shields the fast path and store load: at most one invocation is
/// inside the critical section per ticket at any instant. Correctness is
/// independently guaranteed by the row lock inside the admission
/// transaction, so a lock-store failover race can never double-admit.
#[async_trait]
pub trait TicketLock: Send + Sync {
    /// Atomically take the lock if it is absent.
    ///
    /// Returns the fresh ownership token on success, `None` when another
    /// in-flight decision already holds the lock. "Acquire or fail
    /// immediately" — there is no server-side waiting.
    ///
    /// # Errors
    ///
    /// Fails closed with [`crate::error::GateError::StoreUnavailable`] when
    /// the backing store is unreachable; the caller must deny the scan, not
    /// proceed unguarded.
    async fn acquire(&self, ticket_id: &TicketId) -> Result<Option<LockToken>>;

    /// Release the lock, but only if `token` still owns it.
    ///
    /// Implemented as a single atomic compare-and-delete on the store; a
    /// late caller whose lease expired can never delete a lock reacquired by
    /// someone else. Returns whether a deletion happened.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::StoreUnavailable`] when the store
    /// is unreachable. The lease TTL bounds how long a leaked lock can
    /// block the ticket.
    async fn release(&self, ticket_id: &TicketId, token: &LockToken) -> Result<bool>;
}
