//! The admission orchestrator.
//!
//! Sequences one scan attempt end to end: rate ceiling, token decode, cache
//! fast path, distributed lock, durable check-in, cache update, audit trail,
//! guaranteed lock release. Every collaborator is an injected trait object,
//! so the whole pipeline runs unchanged over the in-memory providers in
//! tests.

use crate::error::Result;
use crate::providers::{AdmissionStore, OutcomeCache, RateLimiter, ScanAuditor, TicketLock};
use crate::token::{TokenCodec, TokenError};
use crate::types::{
    AdmissionContext, CachedOutcome, CheckInRequest, Decision, EventId, EventStats, NewScanRecord,
    Order, ScanOutcome, TicketHistory, TicketId, VerifyRequest,
};
use std::sync::Arc;
use std::time::Duration;

/// Orchestrates scan verification across the codec, the stores and the
/// audit trail.
#[derive(Clone)]
pub struct AdmissionService {
    codec: TokenCodec,
    lock: Arc<dyn TicketLock>,
    cache: Arc<dyn OutcomeCache>,
    limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn AdmissionStore>,
    auditor: Arc<dyn ScanAuditor>,
    cache_ttl: Duration,
}

impl AdmissionService {
    /// Wire the pipeline from explicitly constructed providers.
    #[must_use]
    pub fn new(
        codec: TokenCodec,
        lock: Arc<dyn TicketLock>,
        cache: Arc<dyn OutcomeCache>,
        limiter: Arc<dyn RateLimiter>,
        store: Arc<dyn AdmissionStore>,
        auditor: Arc<dyn ScanAuditor>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            lock,
            cache,
            limiter,
            store,
            auditor,
            cache_ttl,
        }
    }

    /// Authoritative scan verification.
    ///
    /// Pipeline: rate ceiling, decode, cache fast path, lock acquire (or
    /// retryable `ConcurrentScan`), durable check-in, cache update on a
    /// terminal outcome, audit, release. The lock is released on every exit
    /// path of the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError`] only for infrastructure failures; the request
    /// fails closed. Every business outcome is a [`Decision`] value.
    #[tracing::instrument(skip(self, request), fields(device_id = %request.device_id, gate_id = %request.gate_id))]
    pub async fn verify(&self, request: &VerifyRequest) -> Result<Decision> {
        let rate = self.limiter.check_and_record(&request.device_id).await?;
        if rate.limited {
            return Ok(Decision::RateLimited {
                retry_after_secs: self.limiter.retry_after_secs(),
            });
        }

        let ticket_id = match self.codec.decode(&request.token) {
            Ok(id) => id,
            Err(err) => {
                // No lock, no transaction: record the raw presented value so
                // probing attempts still show up on the dashboard.
                let decision = Decision::InvalidToken {
                    reason: err.to_string(),
                };
                self.audit(&TicketId::new(request.token.clone()), None, &decision, request)
                    .await;
                return Ok(decision);
            }
        };

        let scope = request.expected_event_id.as_ref();
        if let Some(cached) = self.cache_lookup(&ticket_id, scope).await {
            if cached.outcome == ScanOutcome::AlreadyAdmitted {
                let decision = Decision::AlreadyAdmitted {
                    admitted_at: cached.admitted_at,
                    admitted_by: None,
                    admitted_by_gate: None,
                    context: self.display_context(&ticket_id).await,
                };
                self.audit(&ticket_id, scope, &decision, request).await;
                tracing::debug!(ticket_id = %ticket_id, "Repeat scan served from cache");
                return Ok(decision);
            }
        }

        // Acquire or fail immediately; contention is the scanner's cue to
        // rescan, not something to queue on.
        let Some(lock_token) = self.lock.acquire(&ticket_id).await? else {
            return Ok(Decision::ConcurrentScan);
        };

        let outcome = self.decide_locked(&ticket_id, request).await;

        if let Err(err) = self.lock.release(&ticket_id, &lock_token).await {
            tracing::warn!(ticket_id = %ticket_id, error = %err, "Lock release failed, lease will expire");
        }

        let decision = outcome?;
        tracing::info!(
            ticket_id = %ticket_id,
            code = decision.code(),
            "Scan decided"
        );
        Ok(decision)
    }

    /// The critical section: check in, cache terminal outcomes, audit.
    /// Callers must hold the ticket lock and release it afterwards.
    async fn decide_locked(
        &self,
        ticket_id: &TicketId,
        request: &VerifyRequest,
    ) -> Result<Decision> {
        let decision = self
            .store
            .check_in(&CheckInRequest {
                ticket_id: ticket_id.clone(),
                device_id: request.device_id.clone(),
                gate_id: request.gate_id.clone(),
                expected_event_id: request.expected_event_id.clone(),
            })
            .await?;

        let scope = request.expected_event_id.as_ref();
        match &decision {
            Decision::Admitted { admitted_at, .. } => {
                self.cache_store(ticket_id, scope, Some(*admitted_at)).await;
            }
            Decision::AlreadyAdmitted { admitted_at, .. } => {
                self.cache_store(ticket_id, scope, *admitted_at).await;
            }
            _ => {}
        }

        self.audit(ticket_id, scope, &decision, request).await;
        Ok(decision)
    }

    /// Read-only sibling of [`AdmissionService::verify`]: same resolution,
    /// no rate counting, no lock, no cache write, no audit record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError`] on infrastructure failure.
    pub async fn validate(&self, request: &VerifyRequest) -> Result<Decision> {
        let ticket_id = match self.codec.decode(&request.token) {
            Ok(id) => id,
            Err(err) => {
                return Ok(Decision::InvalidToken {
                    reason: err.to_string(),
                });
            }
        };
        self.store
            .validate(&ticket_id, request.expected_event_id.as_ref())
            .await
    }

    /// The events a ticket grants access to plus its scan timeline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    pub async fn history(&self, token_or_id: &str) -> Result<Option<TicketHistory>> {
        // Accept either a signed token or a bare ticket identifier; the
        // dashboard holds identifiers, scanners hold tokens.
        let ticket_id = match self.codec.decode(token_or_id) {
            Ok(id) => id,
            Err(TokenError::Invalid | TokenError::Expired) => TicketId::new(token_or_id),
        };
        self.store.history(&ticket_id).await
    }

    /// Aggregate admission counters for one event.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GateError::Database`] on query failure.
    pub async fn event_stats(&self, event_id: &EventId) -> Result<Option<EventStats>> {
        self.store.event_stats(event_id).await
    }

    /// Encode a ticket identifier into its signed scannable form.
    #[must_use]
    pub fn encode_token(&self, ticket_id: &TicketId) -> String {
        self.codec.encode(ticket_id)
    }

    /// Cache lookup; unavailability degrades to a miss.
    async fn cache_lookup(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
    ) -> Option<CachedOutcome> {
        match self.cache.get(ticket_id, scope).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(ticket_id = %ticket_id, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Record that the ticket is now terminally admitted for the scope.
    /// Best-effort: the durable transaction already holds the truth.
    async fn cache_store(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
        admitted_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let entry = CachedOutcome {
            outcome: ScanOutcome::AlreadyAdmitted,
            admitted_at,
        };
        if let Err(err) = self
            .cache
            .put(ticket_id, scope, &entry, self.cache_ttl)
            .await
        {
            tracing::warn!(ticket_id = %ticket_id, error = %err, "Cache write failed");
        }
    }

    /// Append to the audit trail when the decision calls for it. A failed
    /// append never blocks or reverses the decision.
    async fn audit(
        &self,
        ticket_id: &TicketId,
        scope: Option<&EventId>,
        decision: &Decision,
        request: &VerifyRequest,
    ) {
        let Some(outcome) = decision.audit_outcome() else {
            return;
        };
        let record = NewScanRecord {
            ticket_id: ticket_id.clone(),
            event_id: scope.cloned(),
            outcome,
            device_id: request.device_id.clone(),
            gate_id: request.gate_id.clone(),
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        };
        if let Err(err) = self.auditor.record(&record).await {
            tracing::error!(
                ticket_id = %ticket_id,
                outcome = outcome.as_str(),
                error = %err,
                "Audit append failed"
            );
        }
    }

    /// Best-effort display context for fast-path decisions.
    async fn display_context(&self, ticket_id: &TicketId) -> Option<AdmissionContext> {
        match self.store.get_order(ticket_id).await {
            Ok(Some(order)) => Some(order_context(&order)),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(ticket_id = %ticket_id, error = %err, "Context lookup failed");
                None
            }
        }
    }
}

fn order_context(order: &Order) -> AdmissionContext {
    AdmissionContext {
        ticket_id: order.ticket_id.clone(),
        quantity: order.quantity,
        attendee: order.attendee.clone(),
        event: None,
    }
}
