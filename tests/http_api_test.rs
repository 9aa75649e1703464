//! HTTP surface tests over the in-memory providers.

#![allow(clippy::unwrap_used)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Utc;
use gatecheck::mocks::{MockAdmissionStore, MockOutcomeCache, MockRateLimiter, MockTicketLock};
use gatecheck::server::{AppState, build_router};
use gatecheck::types::{Attendee, EventId, EventInfo, Order, PaymentStatus, TicketId};
use gatecheck::{AdmissionService, TokenCodec};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &[u8] = b"test-secret";

fn server_with(store: MockAdmissionStore) -> (TestServer, TokenCodec) {
    let codec = TokenCodec::new(SECRET.to_vec());
    let service = Arc::new(AdmissionService::new(
        codec.clone(),
        Arc::new(MockTicketLock::new(Duration::from_secs(5))),
        Arc::new(MockOutcomeCache::new()),
        Arc::new(MockRateLimiter::new(100, Duration::from_secs(60))),
        Arc::new(store.clone()),
        Arc::new(store),
        Duration::from_secs(300),
    ));
    let router = build_router(AppState::for_testing(service));
    (TestServer::new(router).unwrap(), codec)
}

fn seeded_store() -> MockAdmissionStore {
    let store = MockAdmissionStore::new();
    store.insert_event(EventInfo {
        id: EventId::new("ev-1"),
        name: "Launch Night".to_string(),
        venue: "Main Hall".to_string(),
        date: Utc::now(),
        capacity: 100,
        price_cents: 70000,
        is_active: true,
        scope_token: None,
        scan_order: 0,
    });
    store.insert_order_with_total(
        Order {
            ticket_id: TicketId::new("ORD-AB12CD"),
            event_id: EventId::new("ev-1"),
            scope_tokens: vec![],
            payment_status: PaymentStatus::Paid,
            quantity: 1,
            checked_in: false,
            checked_in_at: None,
            checked_in_by: None,
            checked_in_gate: None,
            attendee: Some(Attendee {
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
            }),
        },
        70000,
    );
    store
}

fn device_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-device-id"),
        HeaderValue::from_static("scanner-1"),
    )
}

fn gate_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-gate-id"),
        HeaderValue::from_static("gate-a"),
    )
}

#[tokio::test]
async fn verify_admits_then_conflicts() {
    let (server, codec) = server_with(seeded_store());
    let token = codec.encode(&TicketId::new("ORD-AB12CD"));
    let (device, device_value) = device_header();
    let (gate, gate_value) = gate_header();

    let response = server
        .post("/api/scan/verify")
        .add_header(device.clone(), device_value.clone())
        .add_header(gate.clone(), gate_value.clone())
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["admitted"], json!(true));
    assert_eq!(body["code"], json!("ADMITTED"));
    assert_eq!(body["ticket"]["attendee"]["name"], json!("Ada Lovelace"));

    let response = server
        .post("/api/scan/verify")
        .add_header(device, device_value)
        .add_header(gate, gate_value)
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("ALREADY_ADMITTED"));
    assert_eq!(body["retryable"], json!(false));
    assert!(body["admittedAt"].is_string());
}

#[tokio::test]
async fn verify_requires_identity_headers() {
    let (server, codec) = server_with(seeded_store());
    let token = codec.encode(&TicketId::new("ORD-AB12CD"));

    let response = server
        .post("/api/scan/verify")
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn verify_rejects_tampered_token() {
    let (server, _) = server_with(seeded_store());
    let (device, device_value) = device_header();
    let (gate, gate_value) = gate_header();

    let response = server
        .post("/api/scan/verify")
        .add_header(device, device_value)
        .add_header(gate, gate_value)
        .json(&json!({ "token": "ORD-AB12CD.000000000000" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("INVALID_TOKEN"));
    assert_eq!(body["message"], json!("Invalid token"));
}

#[tokio::test]
async fn validate_is_read_only() {
    let store = seeded_store();
    let (server, codec) = server_with(store.clone());
    let token = codec.encode(&TicketId::new("ORD-AB12CD"));
    let (device, device_value) = device_header();
    let (gate, gate_value) = gate_header();

    let response = server
        .post("/api/scan/validate")
        .add_header(device, device_value)
        .add_header(gate, gate_value)
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["admitted"], json!(true));
    assert!(store.scans().is_empty(), "validate must not record scans");
}

#[tokio::test]
async fn history_returns_timeline() {
    let (server, codec) = server_with(seeded_store());
    let token = codec.encode(&TicketId::new("ORD-AB12CD"));
    let (device, device_value) = device_header();
    let (gate, gate_value) = gate_header();

    let _ = server
        .post("/api/scan/verify")
        .add_header(device, device_value)
        .add_header(gate, gate_value)
        .json(&json!({ "token": token }))
        .await;

    let response = server
        .post("/api/scan/history")
        .json(&json!({ "token": token }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["ticketId"], json!("ORD-AB12CD"));
    assert_eq!(body["purchasedEvents"][0]["name"], json!("Launch Night"));
    assert_eq!(body["scans"][0]["outcome"], json!("admitted"));

    let response = server
        .post("/api/scan/history")
        .json(&json!({ "token": "ORD-NOPE" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_report_counters() {
    let (server, codec) = server_with(seeded_store());
    let token = codec.encode(&TicketId::new("ORD-AB12CD"));
    let (device, device_value) = device_header();
    let (gate, gate_value) = gate_header();

    let _ = server
        .post("/api/scan/verify")
        .add_header(device, device_value)
        .add_header(gate, gate_value)
        .json(&json!({ "token": token }))
        .await;

    let response = server.get("/api/scan/stats/ev-1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["ticketsSold"], json!(1));
    assert_eq!(body["checkedIn"], json!(1));
    assert_eq!(body["revenueCents"], json!(70000));

    let response = server.get("/api/scan/stats/ev-404").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_readiness_respond() {
    let (server, _) = server_with(seeded_store());

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], json!("ok"));

    let response = server.get("/ready").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["ready"], json!(true));
}
