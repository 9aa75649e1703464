//! Durable storage seams: the authoritative admission transaction and the
//! append-only scan audit trail.

use crate::error::Result;
use crate::types::{
    CheckInRequest, Decision, EventId, EventStats, NewScanRecord, Order, TicketHistory, TicketId,
};
use async_trait::async_trait;

/// The authoritative check-in state machine over durable relational storage.
///
/// For a given (order, resolved event) pair the states are
/// `UNRESOLVED → {NOT_FOUND | NOT_PAID | WRONG_EVENT | ALREADY_ADMITTED |
/// ADMITTED}`. `ADMITTED`/`ALREADY_ADMITTED` are terminal and monotonic; the
/// other denials are re-evaluated on every later attempt (an order marked
/// paid externally admits on the next scan).
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Execute the admission transaction under a row-level lock on the order.
    ///
    /// Resolution order: order lookup, expected-event resolution,
    /// access-scope membership, prior-admission lookup (scan records for the
    /// resolved event), payment gate, grant. Prior admission is checked
    /// before payment so an already-scanned ticket reports
    /// `ALREADY_ADMITTED` even if its payment status later changes.
    ///
    /// On grant the `admitted` scan record is written inside the same
    /// transaction, which is what makes admission at-most-once even if the
    /// distributed lock is bypassed.
    ///
    /// Only the transactional [`Decision`] variants are produced:
    /// `Admitted`, `AlreadyAdmitted`, `NotFound`, `NotPaid`, `WrongEvent`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] when the transaction
    /// fails; the request fails closed.
    async fn check_in(&self, request: &CheckInRequest) -> Result<Decision>;

    /// Read-only sibling of [`AdmissionStore::check_in`] with identical
    /// resolution logic and no mutation. `Admitted` here means "would be
    /// admitted".
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    async fn validate(
        &self,
        ticket_id: &TicketId,
        expected_event_id: Option<&EventId>,
    ) -> Result<Decision>;

    /// Load an order with attendee display details, without any admission
    /// logic. Used for display context on the cache fast path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    async fn get_order(&self, ticket_id: &TicketId) -> Result<Option<Order>>;

    /// The events a ticket grants access to plus its full scan timeline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    async fn history(&self, ticket_id: &TicketId) -> Result<Option<TicketHistory>>;

    /// Aggregate admission counters for one event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    async fn event_stats(&self, event_id: &EventId) -> Result<Option<EventStats>>;

    /// External precondition-setter: mark an order paid. Not part of the
    /// admission state machine itself. Returns whether an order was updated.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on update failure.
    async fn mark_paid(&self, ticket_id: &TicketId) -> Result<bool>;
}

/// Append-only audit trail of scan attempts.
///
/// Records are never updated or deleted. A failure to append must not block
/// or reverse the admission decision; the orchestrator logs and continues.
#[async_trait]
pub trait ScanAuditor: Send + Sync {
    /// Append one scan attempt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on insert failure.
    async fn record(&self, record: &NewScanRecord) -> Result<()>;
}
