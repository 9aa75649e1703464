//! Domain types for the gate admission core.
//!
//! Value objects and entities shared by the token codec, the lock and cache
//! providers, the durable admission store and the HTTP layer. The central
//! type is [`Decision`], a closed enum with one variant per reason code so
//! callers must handle every outcome exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque identifier naming one order/registration — the unit of admission.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap a raw ticket identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an event a ticket may grant access to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Wrap a raw event identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a physical scanning device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a raw device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a physical gate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GateId(String);

impl GateId {
    /// Wrap a raw gate identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random ownership token returned by a successful lock acquisition.
///
/// Release is only honored when the caller presents the token it was handed,
/// so a slow holder can never delete a lock that expired and was reacquired
/// by someone else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap a raw ownership token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Orders and events
// ============================================================================

/// Payment lifecycle of an order. Only `Paid` orders are admissible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Created but not yet paid.
    Pending,
    /// Payment confirmed by an external process.
    Paid,
    /// Payment attempt failed.
    Failed,
    /// Payment was refunded.
    Refunded,
}

impl PaymentStatus {
    /// Database/text representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the text representation; unknown values map to `Pending`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            _ => Self::Pending,
        }
    }
}

/// Attendee display details, denormalized onto the order for gate staff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Attendee name shown at the gate.
    pub name: String,
    /// Attendee email.
    pub email: String,
}

/// An order row — the admission unit resolved from a ticket identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Ticket identifier (unique).
    pub ticket_id: TicketId,
    /// The event the order row points at directly.
    pub event_id: EventId,
    /// Scope tokens for multi-event tickets (bundles).
    pub scope_tokens: Vec<String>,
    /// Payment lifecycle state.
    pub payment_status: PaymentStatus,
    /// Number of admissions this order covers at one gate pass.
    pub quantity: u32,
    /// Legacy single-flag check-in marker. Written on grant for dashboard
    /// compatibility, never consulted for admission decisions.
    pub checked_in: bool,
    /// When the legacy marker was set.
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Device that set the legacy marker.
    pub checked_in_by: Option<String>,
    /// Gate that set the legacy marker.
    pub checked_in_gate: Option<String>,
    /// Attendee display details, if known.
    pub attendee: Option<Attendee>,
}

/// Event details needed for access-scope resolution and gate display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// Event identifier.
    pub id: EventId,
    /// Display name.
    pub name: String,
    /// Venue name.
    pub venue: String,
    /// Event start.
    pub date: DateTime<Utc>,
    /// Total admission capacity.
    pub capacity: u32,
    /// Ticket price in minor units.
    pub price_cents: i64,
    /// Whether the event is currently active.
    pub is_active: bool,
    /// Scope token; when present, admission checks membership in the order's
    /// scope-token set instead of direct event equality.
    pub scope_token: Option<String>,
    /// Display ordering for multi-event ticket timelines.
    pub scan_order: i32,
}

impl Order {
    /// Access-scope membership rule.
    ///
    /// An order grants access to `event` when the event carries a scope token
    /// present in the order's token set, or — for legacy single-event
    /// tickets — when the order's own event is `event`.
    #[must_use]
    pub fn grants_access_to(&self, event: &EventInfo) -> bool {
        if let Some(token) = &event.scope_token {
            return self.scope_tokens.iter().any(|t| t == token);
        }
        self.event_id == event.id
    }
}

// ============================================================================
// Scan records
// ============================================================================

/// Terminal outcome of a scan attempt, as recorded in the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Entry granted.
    Admitted,
    /// Ticket was already admitted for the resolved event.
    AlreadyAdmitted,
    /// Token failed signature verification.
    Invalid,
    /// No order matches the ticket identifier.
    NotFound,
    /// Ticket does not grant access to the scanned event.
    WrongEvent,
    /// Order has not been paid.
    NotPaid,
}

impl ScanOutcome {
    /// Database/text representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::AlreadyAdmitted => "already_admitted",
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::WrongEvent => "wrong_event",
            Self::NotPaid => "not_paid",
        }
    }

    /// Parse the text representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admitted" => Some(Self::Admitted),
            "already_admitted" => Some(Self::AlreadyAdmitted),
            "invalid" => Some(Self::Invalid),
            "not_found" => Some(Self::NotFound),
            "wrong_event" => Some(Self::WrongEvent),
            "not_paid" => Some(Self::NotPaid),
            _ => None,
        }
    }
}

/// Append-only record of one scan attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Ticket that was presented.
    pub ticket_id: TicketId,
    /// Event the attempt resolved to, when one could be resolved.
    pub event_id: Option<EventId>,
    /// Outcome of the attempt.
    pub outcome: ScanOutcome,
    /// Scanning device.
    pub device_id: DeviceId,
    /// Physical gate.
    pub gate_id: GateId,
    /// When the attempt happened.
    pub recorded_at: DateTime<Utc>,
    /// Client address, if forwarded.
    pub ip_address: Option<String>,
    /// Scanner user agent, if forwarded.
    pub user_agent: Option<String>,
}

/// Input for appending a scan record.
#[derive(Clone, Debug)]
pub struct NewScanRecord {
    /// Ticket that was presented.
    pub ticket_id: TicketId,
    /// Resolved event, when known.
    pub event_id: Option<EventId>,
    /// Outcome to record.
    pub outcome: ScanOutcome,
    /// Scanning device.
    pub device_id: DeviceId,
    /// Physical gate.
    pub gate_id: GateId,
    /// Client address, if forwarded.
    pub ip_address: Option<String>,
    /// Scanner user agent, if forwarded.
    pub user_agent: Option<String>,
}

// ============================================================================
// Cache and rate limiting
// ============================================================================

/// Cached terminal outcome for a (ticket, scope) pair.
///
/// Purely an optimization: only ever consulted to short-circuit a denial,
/// never to grant admission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedOutcome {
    /// The terminal outcome (already-admitted or invalid).
    pub outcome: ScanOutcome,
    /// When admission happened, for already-admitted entries.
    pub admitted_at: Option<DateTime<Utc>>,
}

/// Result of an atomic rate-limit check-and-record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateCheck {
    /// Attempts observed in the current window, including this one.
    pub attempts: u64,
    /// Whether the device is over its ceiling.
    pub limited: bool,
}

// ============================================================================
// Decisions
// ============================================================================

/// Display context returned with a decision so gate staff can make a manual
/// judgment call: the order, attendee and the event the ticket belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionContext {
    /// Ticket identifier.
    pub ticket_id: TicketId,
    /// Admission quantity.
    pub quantity: u32,
    /// Attendee display details.
    pub attendee: Option<Attendee>,
    /// The event the order was bought for (not the gate being attempted).
    pub event: Option<EventDisplay>,
}

/// Event display details embedded in decisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDisplay {
    /// Event identifier.
    pub id: EventId,
    /// Display name.
    pub name: String,
    /// Venue name.
    pub venue: String,
}

impl EventDisplay {
    /// Build display details from a full event row.
    #[must_use]
    pub fn from_info(info: &EventInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            venue: info.venue.clone(),
        }
    }
}

/// The structured decision returned for every scan attempt.
///
/// Business-rule outcomes are values, never errors; infrastructure failures
/// surface separately as [`crate::error::GateError`]. `Admitted` and
/// `AlreadyAdmitted` are terminal for a (ticket, resolved event) pair; the
/// other denials are re-evaluated on every later attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Entry granted.
    Admitted {
        /// When admission was recorded.
        admitted_at: DateTime<Utc>,
        /// Display context.
        context: AdmissionContext,
    },
    /// Ticket was already admitted for the resolved event.
    AlreadyAdmitted {
        /// When the original admission happened.
        admitted_at: Option<DateTime<Utc>>,
        /// Device that performed the original admission.
        admitted_by: Option<String>,
        /// Gate that performed the original admission.
        admitted_by_gate: Option<String>,
        /// Display context, when the order could be loaded.
        context: Option<AdmissionContext>,
    },
    /// No order matches the ticket identifier.
    NotFound,
    /// Order exists but has not been paid.
    NotPaid {
        /// Display context.
        context: Option<AdmissionContext>,
    },
    /// Ticket does not grant access to the scanned event.
    WrongEvent {
        /// Display context.
        context: Option<AdmissionContext>,
    },
    /// Token failed decoding or signature verification.
    InvalidToken {
        /// Human-readable reason ("Invalid token" / "Expired token").
        reason: String,
    },
    /// The scanning device is over its attempt ceiling. Retryable.
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },
    /// Another in-flight decision holds the ticket lock. Retryable.
    ConcurrentScan,
}

impl Decision {
    /// Whether this decision grants entry.
    #[must_use]
    pub const fn admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Stable reason code for clients and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "ADMITTED",
            Self::AlreadyAdmitted { .. } => "ALREADY_ADMITTED",
            Self::NotFound => "NOT_FOUND",
            Self::NotPaid { .. } => "NOT_PAID",
            Self::WrongEvent { .. } => "WRONG_EVENT",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ConcurrentScan => "CONCURRENT_SCAN",
        }
    }

    /// Whether staff should simply rescan rather than treat this as a hard
    /// denial.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ConcurrentScan)
    }

    /// Human-readable message shown at the gate.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Admitted { .. } => "Entry allowed".to_string(),
            Self::AlreadyAdmitted { .. } => "Ticket has already been used".to_string(),
            Self::NotFound => "Ticket not found".to_string(),
            Self::NotPaid { .. } => "Ticket has not been paid".to_string(),
            Self::WrongEvent { .. } => "Ticket is not valid for this event".to_string(),
            Self::InvalidToken { reason } => reason.clone(),
            Self::RateLimited { .. } => "Too many scans, slow down".to_string(),
            Self::ConcurrentScan => {
                "Ticket is being scanned at another gate, please wait".to_string()
            }
        }
    }

    /// The audit-trail outcome for this decision, when the attempt should be
    /// recorded by the orchestrator. `Admitted` is recorded atomically inside
    /// the check-in transaction and retryable decisions are not audited.
    #[must_use]
    pub const fn audit_outcome(&self) -> Option<ScanOutcome> {
        match self {
            Self::AlreadyAdmitted { .. } => Some(ScanOutcome::AlreadyAdmitted),
            Self::NotFound => Some(ScanOutcome::NotFound),
            Self::NotPaid { .. } => Some(ScanOutcome::NotPaid),
            Self::WrongEvent { .. } => Some(ScanOutcome::WrongEvent),
            Self::InvalidToken { .. } => Some(ScanOutcome::Invalid),
            Self::Admitted { .. } | Self::RateLimited { .. } | Self::ConcurrentScan => None,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Input to the authoritative check-in transaction.
#[derive(Clone, Debug)]
pub struct CheckInRequest {
    /// Ticket to admit.
    pub ticket_id: TicketId,
    /// Scanning device.
    pub device_id: DeviceId,
    /// Physical gate.
    pub gate_id: GateId,
    /// Event the gate is scoped to, when it is.
    pub expected_event_id: Option<EventId>,
}

/// Input to the orchestrated verify/validate operations.
#[derive(Clone, Debug)]
pub struct VerifyRequest {
    /// Signed ticket token as presented by the scanner.
    pub token: String,
    /// Scanning device identity.
    pub device_id: DeviceId,
    /// Physical gate identity.
    pub gate_id: GateId,
    /// Event the gate is scoped to, when it is.
    pub expected_event_id: Option<EventId>,
    /// Client address, if forwarded.
    pub ip_address: Option<String>,
    /// Scanner user agent, if forwarded.
    pub user_agent: Option<String>,
}

// ============================================================================
// History and stats
// ============================================================================

/// Summary of an event a ticket grants access to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    /// Event identifier.
    pub id: EventId,
    /// Display name.
    pub name: String,
    /// Venue name.
    pub venue: String,
    /// Scope token, when the event is part of a bundle.
    pub scope_token: Option<String>,
}

/// One entry of a ticket's scan timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    /// Outcome of the attempt.
    pub outcome: ScanOutcome,
    /// Scanning device.
    pub device_id: DeviceId,
    /// Physical gate.
    pub gate_id: GateId,
    /// When the attempt happened.
    pub recorded_at: DateTime<Utc>,
    /// Event the attempt resolved to.
    pub event: Option<EventSummary>,
}

/// Full history for a ticket: the events it unlocks and its scan timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketHistory {
    /// Ticket identifier.
    pub ticket_id: TicketId,
    /// Attendee display details.
    pub attendee: Option<Attendee>,
    /// Events the ticket grants access to, in scan order.
    pub purchased_events: Vec<EventSummary>,
    /// Timestamp of the most recent scan attempt.
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Scan attempts, newest first.
    pub scans: Vec<ScanHistoryEntry>,
}

/// Aggregate admission counters for one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    /// The event the counters describe.
    pub event: EventInfo,
    /// Tickets sold (paid orders, summed quantity).
    pub tickets_sold: u64,
    /// Admissions recorded.
    pub checked_in: u64,
    /// Revenue across paid orders, in minor units.
    pub revenue_cents: i64,
    /// Capacity remaining.
    pub capacity_remaining: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, scope_token: Option<&str>) -> EventInfo {
        EventInfo {
            id: EventId::new(id),
            name: format!("Event {id}"),
            venue: "Main Hall".to_string(),
            date: Utc::now(),
            capacity: 100,
            price_cents: 70000,
            is_active: true,
            scope_token: scope_token.map(str::to_string),
            scan_order: 0,
        }
    }

    fn order(event_id: &str, scope_tokens: &[&str]) -> Order {
        Order {
            ticket_id: TicketId::new("ORD-TEST-1"),
            event_id: EventId::new(event_id),
            scope_tokens: scope_tokens.iter().map(|s| (*s).to_string()).collect(),
            payment_status: PaymentStatus::Paid,
            quantity: 1,
            checked_in: false,
            checked_in_at: None,
            checked_in_by: None,
            checked_in_gate: None,
            attendee: None,
        }
    }

    #[test]
    fn direct_event_reference_grants_access() {
        let ev = event("ev-1", None);
        assert!(order("ev-1", &[]).grants_access_to(&ev));
        assert!(!order("ev-2", &[]).grants_access_to(&ev));
    }

    #[test]
    fn scope_token_overrides_direct_reference() {
        let ev = event("ev-1", Some("DAY1"));
        // Scope-tokened events require set membership even for the order's
        // own event.
        assert!(!order("ev-1", &[]).grants_access_to(&ev));
        assert!(order("ev-2", &["DAY1", "DAY2"]).grants_access_to(&ev));
    }

    #[test]
    fn decision_codes_are_stable() {
        assert_eq!(Decision::NotFound.code(), "NOT_FOUND");
        assert_eq!(Decision::ConcurrentScan.code(), "CONCURRENT_SCAN");
        assert!(Decision::ConcurrentScan.retryable());
        assert!(!Decision::NotFound.retryable());
    }

    #[test]
    fn scan_outcome_text_round_trips() {
        for outcome in [
            ScanOutcome::Admitted,
            ScanOutcome::AlreadyAdmitted,
            ScanOutcome::Invalid,
            ScanOutcome::NotFound,
            ScanOutcome::WrongEvent,
            ScanOutcome::NotPaid,
        ] {
            assert_eq!(ScanOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(ScanOutcome::parse("bogus"), None);
    }
}
