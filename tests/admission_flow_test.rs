//! End-to-end admission flows over the in-memory providers.
//!
//! Exercises the full orchestration pipeline (rate gate, decode, cache,
//! lock, transaction, audit, release) without any external stores.

#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::Utc;
use gatecheck::mocks::{MockAdmissionStore, MockOutcomeCache, MockRateLimiter, MockTicketLock};
use gatecheck::types::{
    Attendee, Decision, DeviceId, EventId, EventInfo, GateId, Order, PaymentStatus, ScanOutcome,
    TicketId, VerifyRequest,
};
use gatecheck::{AdmissionService, GateError, TokenCodec};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &[u8] = b"test-secret";

struct Fixture {
    service: AdmissionService,
    codec: TokenCodec,
    store: MockAdmissionStore,
    lock: MockTicketLock,
    cache: MockOutcomeCache,
}

fn fixture() -> Fixture {
    fixture_with_rate_limit(100)
}

fn fixture_with_rate_limit(max_per_window: u64) -> Fixture {
    let codec = TokenCodec::new(SECRET.to_vec());
    let store = MockAdmissionStore::new();
    let lock = MockTicketLock::new(Duration::from_secs(5));
    let cache = MockOutcomeCache::new();
    let limiter = MockRateLimiter::new(max_per_window, Duration::from_secs(60));
    let service = AdmissionService::new(
        codec.clone(),
        Arc::new(lock.clone()),
        Arc::new(cache.clone()),
        Arc::new(limiter),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Duration::from_secs(300),
    );
    Fixture {
        service,
        codec,
        store,
        lock,
        cache,
    }
}

fn event(id: &str, scope_token: Option<&str>) -> EventInfo {
    EventInfo {
        id: EventId::new(id),
        name: format!("Event {id}"),
        venue: "Main Hall".to_string(),
        date: Utc::now(),
        capacity: 500,
        price_cents: 70000,
        is_active: true,
        scope_token: scope_token.map(str::to_string),
        scan_order: 0,
    }
}

fn paid_order(ticket_id: &str, event_id: &str, scope_tokens: &[&str]) -> Order {
    Order {
        ticket_id: TicketId::new(ticket_id),
        event_id: EventId::new(event_id),
        scope_tokens: scope_tokens.iter().map(|s| (*s).to_string()).collect(),
        payment_status: PaymentStatus::Paid,
        quantity: 2,
        checked_in: false,
        checked_in_at: None,
        checked_in_by: None,
        checked_in_gate: None,
        attendee: Some(Attendee {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
        }),
    }
}

fn request(token: &str, expected_event_id: Option<&str>) -> VerifyRequest {
    VerifyRequest {
        token: token.to_string(),
        device_id: DeviceId::new("scanner-1"),
        gate_id: GateId::new("gate-a"),
        expected_event_id: expected_event_id.map(EventId::new),
        ip_address: None,
        user_agent: None,
    }
}

#[tokio::test]
async fn fresh_paid_order_is_admitted() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));

    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    let Decision::Admitted { context, .. } = decision else {
        panic!("expected Admitted, got {decision:?}");
    };
    assert_eq!(context.ticket_id, TicketId::new("ORD-AB12CD"));
    assert_eq!(context.quantity, 2);
    assert_eq!(context.attendee.unwrap().name, "Ada Lovelace");
}

#[tokio::test]
async fn rescan_reports_already_admitted_with_stable_timestamp() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));

    let first = fx.service.verify(&request(&token, None)).await.unwrap();
    let Decision::Admitted { admitted_at, .. } = first else {
        panic!("expected Admitted, got {first:?}");
    };

    // Served from the cache fast path.
    let second = fx.service.verify(&request(&token, None)).await.unwrap();
    let Decision::AlreadyAdmitted {
        admitted_at: Some(seen_at),
        ..
    } = second
    else {
        panic!("expected AlreadyAdmitted, got {second:?}");
    };
    assert_eq!(seen_at, admitted_at);

    // Same answer from the authoritative path once the cache entry is gone.
    let fresh = fixture();
    let third = {
        // Reuse the seeded store through a service with an empty cache.
        let service = AdmissionService::new(
            fx.codec.clone(),
            Arc::new(MockTicketLock::new(Duration::from_secs(5))),
            Arc::new(fresh.cache.clone()),
            Arc::new(MockRateLimiter::new(100, Duration::from_secs(60))),
            Arc::new(fx.store.clone()),
            Arc::new(fx.store.clone()),
            Duration::from_secs(300),
        );
        service.verify(&request(&token, None)).await.unwrap()
    };
    let Decision::AlreadyAdmitted {
        admitted_at: Some(stored_at),
        admitted_by: Some(device),
        admitted_by_gate: Some(gate),
        ..
    } = third
    else {
        panic!("expected AlreadyAdmitted, got {third:?}");
    };
    assert_eq!(stored_at, admitted_at);
    assert_eq!(device, "scanner-1");
    assert_eq!(gate, "gate-a");
}

#[tokio::test]
async fn concurrent_scans_admit_at_most_once() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-RACE01", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-RACE01"));

    let req_a = request(&token, None);
    let req_b = request(&token, None);
    let (a, b) = tokio::join!(fx.service.verify(&req_a), fx.service.verify(&req_b));
    let decisions = [a.unwrap(), b.unwrap()];

    let admitted = decisions.iter().filter(|d| d.admitted()).count();
    assert_eq!(admitted, 1, "exactly one grant: {decisions:?}");
    for other in decisions.iter().filter(|d| !d.admitted()) {
        assert!(
            matches!(
                other,
                Decision::ConcurrentScan | Decision::AlreadyAdmitted { .. }
            ),
            "loser must see contention or the prior grant: {other:?}"
        );
    }

    let admitted_records = fx
        .store
        .outcomes_for(&TicketId::new("ORD-RACE01"))
        .into_iter()
        .filter(|o| *o == ScanOutcome::Admitted)
        .count();
    assert_eq!(admitted_records, 1);
}

#[tokio::test]
async fn already_admitted_reports_the_gate_by_name() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    fx.store.insert_gate("gate-a", "Main Entrance");
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));

    fx.service.verify(&request(&token, None)).await.unwrap();

    // Skip the cache fast path so the durable store supplies the context.
    fx.cache.set_unavailable(true);
    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    let Decision::AlreadyAdmitted {
        admitted_by: Some(device),
        admitted_by_gate: Some(gate),
        ..
    } = decision
    else {
        panic!("expected AlreadyAdmitted, got {decision:?}");
    };
    assert_eq!(device, "scanner-1");
    assert_eq!(gate, "Main Entrance");
}

#[tokio::test]
async fn foreign_lock_token_never_releases_a_held_lock() {
    use gatecheck::providers::TicketLock;
    use gatecheck::types::LockToken;

    let lock = MockTicketLock::new(Duration::from_secs(5));
    let ticket = TicketId::new("ORD-LOCK01");

    let token = lock.acquire(&ticket).await.unwrap().unwrap();
    let foreign = LockToken::new("someone-elses-token");

    assert!(!lock.release(&ticket, &foreign).await.unwrap());
    assert!(lock.is_held(&ticket), "owner's lease must survive");
    assert!(lock.acquire(&ticket).await.unwrap().is_none());

    // The rightful owner still releases cleanly.
    assert!(lock.release(&ticket, &token).await.unwrap());
    assert!(lock.acquire(&ticket).await.unwrap().is_some());
}

#[tokio::test]
async fn wrong_event_gate_denies() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_event(event("ev-2", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));

    let decision = fx.service.verify(&request(&token, Some("ev-2"))).await.unwrap();
    assert!(matches!(decision, Decision::WrongEvent { .. }));
    assert_eq!(
        fx.store.outcomes_for(&TicketId::new("ORD-AB12CD")),
        vec![ScanOutcome::WrongEvent]
    );
}

#[tokio::test]
async fn unpaid_order_admits_after_marked_paid() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    let mut order = paid_order("ORD-UNPAID", "ev-1", &[]);
    order.payment_status = PaymentStatus::Pending;
    fx.store.insert_order(order);
    let token = fx.codec.encode(&TicketId::new("ORD-UNPAID"));

    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(matches!(decision, Decision::NotPaid { .. }));

    use gatecheck::providers::AdmissionStore;
    assert!(fx.store.mark_paid(&TicketId::new("ORD-UNPAID")).await.unwrap());

    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(decision.admitted(), "paid order should now admit: {decision:?}");
}

#[tokio::test]
async fn corrupted_signature_never_touches_the_lock() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));
    let corrupted = {
        let (id, sig) = token.split_once('.').unwrap();
        let flipped: String = sig
            .chars()
            .map(|c| if c == '0' { '1' } else { '0' })
            .collect();
        format!("{id}.{flipped}")
    };

    let decision = fx.service.verify(&request(&corrupted, None)).await.unwrap();
    assert!(matches!(decision, Decision::InvalidToken { .. }));
    assert_eq!(fx.lock.acquire_calls(), 0);

    // The probe still lands in the audit trail under the raw presented value.
    assert_eq!(
        fx.store.outcomes_for(&TicketId::new(corrupted)),
        vec![ScanOutcome::Invalid]
    );
}

#[tokio::test]
async fn device_over_ceiling_is_rate_limited() {
    let fx = fixture_with_rate_limit(2);
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));

    fx.service.verify(&request(&token, None)).await.unwrap();
    fx.service.verify(&request(&token, None)).await.unwrap();
    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    let Decision::RateLimited { retry_after_secs } = decision else {
        panic!("expected RateLimited, got {decision:?}");
    };
    assert_eq!(retry_after_secs, 60);
}

#[tokio::test]
async fn lock_store_outage_fails_closed() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));
    fx.lock.set_unavailable(true);

    let result = fx.service.verify(&request(&token, None)).await;
    assert!(matches!(result, Err(GateError::StoreUnavailable(_))));
    assert!(
        fx.store.outcomes_for(&TicketId::new("ORD-AB12CD")).is_empty(),
        "no admission may be recorded during an outage"
    );
}

#[tokio::test]
async fn cache_outage_degrades_to_a_miss() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));
    fx.cache.set_unavailable(true);

    // The cache is advisory; the durable path still decides.
    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(decision.admitted());
    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(matches!(decision, Decision::AlreadyAdmitted { .. }));
}

#[tokio::test]
async fn transaction_failure_releases_the_lock() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-AB12CD", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-AB12CD"));
    fx.store.fail_next_check_in();

    let result = fx.service.verify(&request(&token, None)).await;
    assert!(matches!(result, Err(GateError::Database(_))));
    assert!(
        !fx.lock.is_held(&TicketId::new("ORD-AB12CD")),
        "lock must be released on the error path"
    );

    // Next scan goes through cleanly.
    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(decision.admitted());
}

#[tokio::test]
async fn bundle_ticket_admits_once_per_scoped_event() {
    let fx = fixture();
    fx.store.insert_event(event("ev-day1", Some("DAY1")));
    fx.store.insert_event(event("ev-day2", Some("DAY2")));
    fx.store
        .insert_order(paid_order("ORD-BUNDLE", "ev-day1", &["DAY1", "DAY2"]));
    let token = fx.codec.encode(&TicketId::new("ORD-BUNDLE"));

    let day1 = fx.service.verify(&request(&token, Some("ev-day1"))).await.unwrap();
    assert!(day1.admitted());

    // A different scoped event is a fresh admission.
    let day2 = fx.service.verify(&request(&token, Some("ev-day2"))).await.unwrap();
    assert!(day2.admitted());

    // Re-entry at either day is refused.
    let again = fx.service.verify(&request(&token, Some("ev-day1"))).await.unwrap();
    assert!(matches!(again, Decision::AlreadyAdmitted { .. }));
}

#[tokio::test]
async fn validate_never_consumes_the_ticket() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-PEEK01", "ev-1", &[]));
    let token = fx.codec.encode(&TicketId::new("ORD-PEEK01"));

    let peek = fx.service.validate(&request(&token, None)).await.unwrap();
    assert!(peek.admitted(), "would be admitted: {peek:?}");
    assert!(fx.store.scans().is_empty(), "validate must not record scans");
    assert!(fx.cache.is_empty(), "validate must not write the cache");

    // Still fresh for the real scan.
    let real = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(real.admitted());
}

#[tokio::test]
async fn history_lists_events_and_timeline() {
    let fx = fixture();
    fx.store.insert_event(event("ev-day1", Some("DAY1")));
    fx.store.insert_event(event("ev-day2", Some("DAY2")));
    fx.store
        .insert_order(paid_order("ORD-BUNDLE", "ev-day1", &["DAY1", "DAY2"]));
    let token = fx.codec.encode(&TicketId::new("ORD-BUNDLE"));

    fx.service.verify(&request(&token, Some("ev-day1"))).await.unwrap();
    fx.service.verify(&request(&token, Some("ev-day1"))).await.unwrap();

    // Accepts the signed token.
    let history = fx.service.history(&token).await.unwrap().unwrap();
    assert_eq!(history.purchased_events.len(), 2);
    assert_eq!(history.scans.len(), 2);
    assert_eq!(history.last_scanned_at, Some(history.scans[0].recorded_at));

    // And the bare identifier.
    let history = fx.service.history("ORD-BUNDLE").await.unwrap().unwrap();
    assert_eq!(history.ticket_id, TicketId::new("ORD-BUNDLE"));

    assert!(fx.service.history("ORD-NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn event_stats_count_sales_and_admissions() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store
        .insert_order_with_total(paid_order("ORD-S1", "ev-1", &[]), 140_000);
    fx.store
        .insert_order_with_total(paid_order("ORD-S2", "ev-1", &[]), 140_000);
    let token = fx.codec.encode(&TicketId::new("ORD-S1"));
    fx.service.verify(&request(&token, None)).await.unwrap();

    let stats = fx
        .service
        .event_stats(&EventId::new("ev-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.tickets_sold, 4); // two orders, quantity 2 each
    assert_eq!(stats.checked_in, 2);
    assert_eq!(stats.revenue_cents, 280_000);
    assert_eq!(stats.capacity_remaining, 496);

    assert!(fx.service.event_stats(&EventId::new("ev-404")).await.unwrap().is_none());
}

#[tokio::test]
async fn legacy_token_format_still_admits() {
    let fx = fixture();
    fx.store.insert_event(event("ev-1", None));
    fx.store.insert_order(paid_order("ORD-LEGACY", "ev-1", &[]));

    // Legacy three-part self-contained token, as still emitted by old badges.
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use hmac::{Hmac, Mac};
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp_millis() + 60_000;
    let payload =
        URL_SAFE_NO_PAD.encode(format!(r#"{{"orderId":"ORD-LEGACY","expiresAt":{exp}}}"#));
    let signing_input = format!("{header}.{payload}");
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(SECRET).unwrap();
    mac.update(signing_input.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    let token = format!("{signing_input}.{sig}");

    let decision = fx.service.verify(&request(&token, None)).await.unwrap();
    assert!(decision.admitted(), "legacy token should admit: {decision:?}");
}
