//! In-memory providers for tests and local development.
//!
//! Each mock mirrors the semantics of its production counterpart closely
//! enough that the orchestration tests exercise real decision flows: the
//! lock honors leases and ownership tokens, the cache honors lifetimes, and
//! the store runs the same resolution order as the durable transaction.
//! Failure injection is built in so fail-closed paths can be tested.

use crate::error::{GateError, Result};
use crate::providers::{AdmissionStore, OutcomeCache, RateLimiter, ScanAuditor, TicketLock};
use crate::types::{
    AdmissionContext, CachedOutcome, CheckInRequest, Decision, DeviceId, EventDisplay, EventId,
    EventInfo, EventStats, EventSummary, LockToken, NewScanRecord, Order, PaymentStatus,
    RateCheck, ScanHistoryEntry, ScanOutcome, ScanRecord, TicketHistory, TicketId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Lock
// ============================================================================

/// In-memory [`TicketLock`] with real leases and ownership tokens.
#[derive(Clone)]
pub struct MockTicketLock {
    held: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    ttl: Duration,
    unavailable: Arc<AtomicBool>,
    acquire_calls: Arc<AtomicU64>,
}

impl MockTicketLock {
    /// Build with the given lease duration.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            unavailable: Arc::new(AtomicBool::new(false)),
            acquire_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Simulate the lock store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many acquisitions were attempted.
    #[must_use]
    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Whether the lock for `ticket_id` is currently held.
    #[must_use]
    pub fn is_held(&self, ticket_id: &TicketId) -> bool {
        locked(&self.held)
            .get(ticket_id.as_str())
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait::async_trait]
impl TicketLock for MockTicketLock {
    async fn acquire(&self, ticket_id: &TicketId) -> Result<Option<LockToken>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::StoreUnavailable("lock store down".to_string()));
        }
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);

        let mut held = locked(&self.held);
        let now = Instant::now();
        if let Some((_, expires)) = held.get(ticket_id.as_str()) {
            if *expires > now {
                return Ok(None);
            }
        }
        let token = uuid::Uuid::new_v4().to_string();
        held.insert(
            ticket_id.as_str().to_string(),
            (token.clone(), now + self.ttl),
        );
        Ok(Some(LockToken::new(token)))
    }

    async fn release(&self, ticket_id: &TicketId, token: &LockToken) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::StoreUnavailable("lock store down".to_string()));
        }
        let mut held = locked(&self.held);
        match held.get(ticket_id.as_str()) {
            Some((owner, _)) if owner == token.as_str() => {
                held.remove(ticket_id.as_str());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// In-memory [`OutcomeCache`] with real entry lifetimes.
#[derive(Clone, Default)]
pub struct MockOutcomeCache {
    entries: Arc<Mutex<HashMap<String, (CachedOutcome, Instant)>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockOutcomeCache {
    /// Build an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        locked(&self.entries)
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    /// Whether the cache has no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(ticket_id: &TicketId, scope: Option<&EventId>) -> String {
        format!(
            "{}:{}",
            ticket_id,
            scope.map_or("all", EventId::as_str)
        )
    }
}

#[async_trait::async_trait]
impl OutcomeCache for MockOutcomeCache {
    async fn get(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
    ) -> Result<Option<CachedOutcome>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::StoreUnavailable("cache store down".to_string()));
        }
        let entries = locked(&self.entries);
        Ok(entries
            .get(&Self::key(ticket_id, scope))
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(entry, _)| entry.clone()))
    }

    async fn put(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
        entry: &CachedOutcome,
        ttl: Duration,
    ) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GateError::StoreUnavailable("cache store down".to_string()));
        }
        locked(&self.entries).insert(
            Self::key(ticket_id, scope),
            (entry.clone(), Instant::now() + ttl),
        );
        Ok(())
    }
}

// ============================================================================
// Rate limiter
// ============================================================================

/// In-memory [`RateLimiter`] over a rolling window.
#[derive(Clone)]
pub struct MockRateLimiter {
    counters: Arc<Mutex<HashMap<String, (u64, Instant)>>>,
    max_per_window: u64,
    window: Duration,
}

impl MockRateLimiter {
    /// Build with the given ceiling and window.
    #[must_use]
    pub fn new(max_per_window: u64, window: Duration) -> Self {
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            max_per_window,
            window,
        }
    }
}

#[async_trait::async_trait]
impl RateLimiter for MockRateLimiter {
    async fn check_and_record(&self, device_id: &DeviceId) -> Result<RateCheck> {
        let mut counters = locked(&self.counters);
        let now = Instant::now();
        let entry = counters
            .entry(device_id.as_str().to_string())
            .or_insert((0, now + self.window));
        if entry.1 <= now {
            *entry = (0, now + self.window);
        }
        entry.0 += 1;
        Ok(RateCheck {
            attempts: entry.0,
            limited: entry.0 > self.max_per_window,
        })
    }

    fn retry_after_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

// ============================================================================
// Admission store + auditor
// ============================================================================

#[derive(Default)]
struct StoreState {
    orders: HashMap<String, Order>,
    order_totals: HashMap<String, i64>,
    events: HashMap<String, EventInfo>,
    gates: HashMap<String, String>,
    scans: Vec<ScanRecord>,
}

/// In-memory [`AdmissionStore`] and [`ScanAuditor`] over one shared state.
///
/// Runs the same resolution order as the durable transaction; the single
/// interior mutex stands in for the row lock.
#[derive(Clone, Default)]
pub struct MockAdmissionStore {
    state: Arc<Mutex<StoreState>>,
    fail_next_check_in: Arc<AtomicBool>,
}

impl MockAdmissionStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an event.
    pub fn insert_event(&self, event: EventInfo) {
        locked(&self.state)
            .events
            .insert(event.id.as_str().to_string(), event);
    }

    /// Seed an order.
    pub fn insert_order(&self, order: Order) {
        self.insert_order_with_total(order, 0);
    }

    /// Register a gate's display name.
    pub fn insert_gate(&self, id: impl Into<String>, name: impl Into<String>) {
        locked(&self.state).gates.insert(id.into(), name.into());
    }

    /// Seed an order with its paid total, for stats assertions.
    pub fn insert_order_with_total(&self, order: Order, total_cents: i64) {
        let mut state = locked(&self.state);
        state
            .order_totals
            .insert(order.ticket_id.as_str().to_string(), total_cents);
        state
            .orders
            .insert(order.ticket_id.as_str().to_string(), order);
    }

    /// Make the next `check_in` fail with a database error.
    pub fn fail_next_check_in(&self) {
        self.fail_next_check_in.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all recorded scan attempts, in insertion order.
    #[must_use]
    pub fn scans(&self) -> Vec<ScanRecord> {
        locked(&self.state).scans.clone()
    }

    /// Recorded outcomes for one ticket, in insertion order.
    #[must_use]
    pub fn outcomes_for(&self, ticket_id: &TicketId) -> Vec<ScanOutcome> {
        locked(&self.state)
            .scans
            .iter()
            .filter(|s| s.ticket_id == *ticket_id)
            .map(|s| s.outcome)
            .collect()
    }

    fn context_for(state: &StoreState, order: &Order) -> AdmissionContext {
        AdmissionContext {
            ticket_id: order.ticket_id.clone(),
            quantity: order.quantity,
            attendee: order.attendee.clone(),
            event: state
                .events
                .get(order.event_id.as_str())
                .map(EventDisplay::from_info),
        }
    }

    fn resolve(
        state: &StoreState,
        ticket_id: &TicketId,
        expected_event_id: Option<&EventId>,
    ) -> Resolution {
        let Some(order) = state.orders.get(ticket_id.as_str()).cloned() else {
            return Resolution::Decided(Decision::NotFound);
        };
        let context = Self::context_for(state, &order);

        let expected_event = match expected_event_id {
            Some(id) => match state.events.get(id.as_str()) {
                Some(event) => Some(event.clone()),
                None => {
                    return Resolution::Decided(Decision::WrongEvent {
                        context: Some(context),
                    });
                }
            },
            None => None,
        };

        if let Some(event) = &expected_event {
            if !order.grants_access_to(event) {
                return Resolution::Decided(Decision::WrongEvent {
                    context: Some(context),
                });
            }
        }

        let resolved_event_id = expected_event
            .as_ref()
            .map_or(&order.event_id, |e| &e.id)
            .clone();

        let prior = state
            .scans
            .iter()
            .filter(|s| {
                s.ticket_id == order.ticket_id
                    && s.outcome == ScanOutcome::Admitted
                    && s.event_id.as_ref() == Some(&resolved_event_id)
            })
            .min_by_key(|s| s.recorded_at);
        if let Some(prior) = prior {
            // Registered gates surface their display name, as staff see it.
            let gate = state
                .gates
                .get(prior.gate_id.as_str())
                .cloned()
                .unwrap_or_else(|| prior.gate_id.as_str().to_string());
            return Resolution::Decided(Decision::AlreadyAdmitted {
                admitted_at: Some(prior.recorded_at),
                admitted_by: Some(prior.device_id.as_str().to_string()),
                admitted_by_gate: Some(gate),
                context: Some(context),
            });
        }

        if order.payment_status != PaymentStatus::Paid {
            return Resolution::Decided(Decision::NotPaid {
                context: Some(context),
            });
        }

        Resolution::Admissible {
            order,
            resolved_event_id,
            context,
        }
    }
}

enum Resolution {
    Decided(Decision),
    Admissible {
        order: Order,
        resolved_event_id: EventId,
        context: AdmissionContext,
    },
}

#[async_trait::async_trait]
impl AdmissionStore for MockAdmissionStore {
    async fn check_in(&self, request: &CheckInRequest) -> Result<Decision> {
        if self.fail_next_check_in.swap(false, Ordering::SeqCst) {
            return Err(GateError::Database("injected failure".to_string()));
        }

        let mut state = locked(&self.state);
        match Self::resolve(&state, &request.ticket_id, request.expected_event_id.as_ref()) {
            Resolution::Decided(decision) => Ok(decision),
            Resolution::Admissible {
                order,
                resolved_event_id,
                context,
            } => {
                let now = Utc::now();
                if let Some(stored) = state.orders.get_mut(order.ticket_id.as_str()) {
                    stored.checked_in = true;
                    stored.checked_in_at.get_or_insert(now);
                    stored
                        .checked_in_by
                        .get_or_insert_with(|| request.device_id.as_str().to_string());
                    stored
                        .checked_in_gate
                        .get_or_insert_with(|| request.gate_id.as_str().to_string());
                }
                state.scans.push(ScanRecord {
                    ticket_id: order.ticket_id,
                    event_id: Some(resolved_event_id),
                    outcome: ScanOutcome::Admitted,
                    device_id: request.device_id.clone(),
                    gate_id: request.gate_id.clone(),
                    recorded_at: now,
                    ip_address: None,
                    user_agent: None,
                });
                Ok(Decision::Admitted {
                    admitted_at: now,
                    context,
                })
            }
        }
    }

    async fn validate(
        &self,
        ticket_id: &TicketId,
        expected_event_id: Option<&EventId>,
    ) -> Result<Decision> {
        let state = locked(&self.state);
        match Self::resolve(&state, ticket_id, expected_event_id) {
            Resolution::Decided(decision) => Ok(decision),
            Resolution::Admissible { context, .. } => Ok(Decision::Admitted {
                admitted_at: Utc::now(),
                context,
            }),
        }
    }

    async fn get_order(&self, ticket_id: &TicketId) -> Result<Option<Order>> {
        Ok(locked(&self.state).orders.get(ticket_id.as_str()).cloned())
    }

    async fn history(&self, ticket_id: &TicketId) -> Result<Option<TicketHistory>> {
        let state = locked(&self.state);
        let Some(order) = state.orders.get(ticket_id.as_str()) else {
            return Ok(None);
        };

        let mut events: Vec<&EventInfo> = state
            .events
            .values()
            .filter(|e| {
                e.scope_token
                    .as_ref()
                    .map_or(e.id == order.event_id, |token| {
                        order.scope_tokens.iter().any(|t| t == token)
                    })
            })
            .collect();
        events.sort_by(|a, b| {
            a.scan_order
                .cmp(&b.scan_order)
                .then_with(|| a.date.cmp(&b.date))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut scans: Vec<ScanHistoryEntry> = state
            .scans
            .iter()
            .filter(|s| s.ticket_id == *ticket_id)
            .map(|s| ScanHistoryEntry {
                outcome: s.outcome,
                device_id: s.device_id.clone(),
                gate_id: s.gate_id.clone(),
                recorded_at: s.recorded_at,
                event: s.event_id.as_ref().and_then(|id| {
                    state.events.get(id.as_str()).map(|e| EventSummary {
                        id: e.id.clone(),
                        name: e.name.clone(),
                        venue: e.venue.clone(),
                        scope_token: e.scope_token.clone(),
                    })
                }),
            })
            .collect();
        scans.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));

        Ok(Some(TicketHistory {
            ticket_id: order.ticket_id.clone(),
            attendee: order.attendee.clone(),
            purchased_events: events
                .into_iter()
                .map(|e| EventSummary {
                    id: e.id.clone(),
                    name: e.name.clone(),
                    venue: e.venue.clone(),
                    scope_token: e.scope_token.clone(),
                })
                .collect(),
            last_scanned_at: scans.first().map(|s| s.recorded_at),
            scans,
        }))
    }

    async fn event_stats(&self, event_id: &EventId) -> Result<Option<EventStats>> {
        let state = locked(&self.state);
        let Some(event) = state.events.get(event_id.as_str()).cloned() else {
            return Ok(None);
        };

        let mut sold: u64 = 0;
        let mut revenue: i64 = 0;
        for order in state.orders.values() {
            if order.payment_status != PaymentStatus::Paid {
                continue;
            }
            let covered = event.scope_token.as_ref().map_or(
                order.event_id == event.id,
                |token| order.scope_tokens.iter().any(|t| t == token),
            );
            if covered {
                sold += u64::from(order.quantity);
                revenue += state
                    .order_totals
                    .get(order.ticket_id.as_str())
                    .copied()
                    .unwrap_or(0);
            }
        }

        let checked_in: u64 = state
            .scans
            .iter()
            .filter(|s| {
                s.outcome == ScanOutcome::Admitted && s.event_id.as_ref() == Some(&event.id)
            })
            .filter_map(|s| state.orders.get(s.ticket_id.as_str()))
            .map(|o| u64::from(o.quantity))
            .sum();

        Ok(Some(EventStats {
            capacity_remaining: u64::from(event.capacity).saturating_sub(sold),
            event,
            tickets_sold: sold,
            checked_in,
            revenue_cents: revenue,
        }))
    }

    async fn mark_paid(&self, ticket_id: &TicketId) -> Result<bool> {
        let mut state = locked(&self.state);
        match state.orders.get_mut(ticket_id.as_str()) {
            Some(order) => {
                order.payment_status = PaymentStatus::Paid;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl ScanAuditor for MockAdmissionStore {
    async fn record(&self, record: &NewScanRecord) -> Result<()> {
        locked(&self.state).scans.push(ScanRecord {
            ticket_id: record.ticket_id.clone(),
            event_id: record.event_id.clone(),
            outcome: record.outcome,
            device_id: record.device_id.clone(),
            gate_id: record.gate_id.clone(),
            recorded_at: Utc::now(),
            ip_address: record.ip_address.clone(),
            user_agent: record.user_agent.clone(),
        });
        Ok(())
    }
}
