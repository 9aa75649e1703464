//! Scan API endpoints.
//!
//! - POST /api/scan/verify - verify and check in a ticket
//! - POST /api/scan/validate - peek without consuming
//! - POST /api/scan/history - events and scan timeline for a ticket
//! - GET  /api/scan/stats/:event_id - admission counters
//!
//! Scanner identity arrives in `X-Device-Id` / `X-Gate-Id` headers; both are
//! required on the mutating endpoints.

use super::error::AppError;
use crate::server::state::AppState;
use crate::types::{
    AdmissionContext, Decision, DeviceId, EventId, EventStats, GateId, TicketHistory,
    VerifyRequest,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scanner identity header.
const DEVICE_HEADER: &str = "x-device-id";
/// Gate identity header.
const GATE_HEADER: &str = "x-gate-id";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to verify or validate a ticket token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Signed ticket token from the QR code
    pub token: String,
    /// Event the gate is scoped to, when it is
    pub expected_event_id: Option<String>,
}

/// Request for a ticket's history.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    /// Signed token or bare ticket identifier
    pub token: String,
}

/// Decision rendered for the scanner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    /// Whether entry is granted
    pub admitted: bool,
    /// Stable reason code
    pub code: &'static str,
    /// Human-readable message for gate staff
    pub message: String,
    /// Whether staff should simply rescan
    pub retryable: bool,
    /// When admission happened (grant or original admission)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admitted_at: Option<DateTime<Utc>>,
    /// Device that performed the original admission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admitted_by: Option<String>,
    /// Gate that performed the original admission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admitted_by_gate: Option<String>,
    /// Seconds until a rate-limited device may retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Order/attendee/event display context, where available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<AdmissionContext>,
}

impl ScanResponse {
    /// Render a decision with the original system's status-code mapping.
    #[must_use]
    pub fn from_decision(decision: Decision) -> (StatusCode, Self) {
        let code = decision.code();
        let message = decision.message();
        let retryable = decision.retryable();
        let status = match &decision {
            Decision::Admitted { .. } => StatusCode::OK,
            Decision::AlreadyAdmitted { .. } | Decision::ConcurrentScan => StatusCode::CONFLICT,
            Decision::NotFound => StatusCode::NOT_FOUND,
            Decision::NotPaid { .. } => StatusCode::PAYMENT_REQUIRED,
            Decision::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Decision::WrongEvent { .. } | Decision::InvalidToken { .. } => StatusCode::BAD_REQUEST,
        };

        let mut response = Self {
            admitted: decision.admitted(),
            code,
            message,
            retryable,
            admitted_at: None,
            admitted_by: None,
            admitted_by_gate: None,
            retry_after_secs: None,
            ticket: None,
        };
        match decision {
            Decision::Admitted {
                admitted_at,
                context,
            } => {
                response.admitted_at = Some(admitted_at);
                response.ticket = Some(context);
            }
            Decision::AlreadyAdmitted {
                admitted_at,
                admitted_by,
                admitted_by_gate,
                context,
            } => {
                response.admitted_at = admitted_at;
                response.admitted_by = admitted_by;
                response.admitted_by_gate = admitted_by_gate;
                response.ticket = context;
            }
            Decision::NotPaid { context } | Decision::WrongEvent { context } => {
                response.ticket = context;
            }
            Decision::RateLimited { retry_after_secs } => {
                response.retry_after_secs = Some(retry_after_secs);
            }
            Decision::NotFound | Decision::InvalidToken { .. } | Decision::ConcurrentScan => {}
        }
        (status, response)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/scan/verify - the authoritative admission decision.
///
/// # Errors
///
/// Returns [`AppError`] for missing identity headers or infrastructure
/// failures (which fail closed).
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    let request = verify_request(&headers, body)?;
    let decision = state.service.verify(&request).await?;
    let (status, response) = ScanResponse::from_decision(decision);
    Ok((status, Json(response)))
}

/// POST /api/scan/validate - read-only peek, never mutates.
///
/// # Errors
///
/// Returns [`AppError`] for missing identity headers or infrastructure
/// failures.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    let request = verify_request(&headers, body)?;
    let decision = state.service.validate(&request).await?;
    let (status, response) = ScanResponse::from_decision(decision);
    Ok((status, Json(response)))
}

/// POST /api/scan/history - purchased events plus the scan timeline.
///
/// # Errors
///
/// Returns 404 when no order matches, or [`AppError`] on query failure.
pub async fn history(
    State(state): State<AppState>,
    Json(body): Json<HistoryRequest>,
) -> Result<Json<TicketHistory>, AppError> {
    let history = state
        .service
        .history(&body.token)
        .await?
        .ok_or_else(|| AppError::not_found("Ticket", &body.token))?;
    Ok(Json(history))
}

/// GET /api/scan/stats/:event_id - admission counters for one event.
///
/// # Errors
///
/// Returns 404 when the event does not exist, or [`AppError`] on query
/// failure.
pub async fn event_stats(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventStats>, AppError> {
    let stats = state
        .service
        .event_stats(&EventId::new(event_id.clone()))
        .await?
        .ok_or_else(|| AppError::not_found("Event", &event_id))?;
    Ok(Json(stats))
}

// ============================================================================
// Helpers
// ============================================================================

fn verify_request(headers: &HeaderMap, body: ScanRequest) -> Result<VerifyRequest, AppError> {
    if body.token.is_empty() {
        return Err(AppError::bad_request("Ticket token is required"));
    }
    Ok(VerifyRequest {
        token: body.token,
        device_id: DeviceId::new(required_header(headers, DEVICE_HEADER)?),
        gate_id: GateId::new(required_header(headers, GATE_HEADER)?),
        expected_event_id: body.expected_event_id.map(EventId::new),
        ip_address: optional_header(headers, "x-forwarded-for"),
        user_agent: optional_header(headers, "user-agent"),
    })
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("{name} header is required")))
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
