//! `PostgreSQL`-backed admission store and scan auditor.
//!
//! `check_in` runs the full resolution inside one transaction holding
//! `SELECT … FOR UPDATE` on the order row, and writes the `admitted` scan
//! record in the same transaction. That row lock is the correctness
//! backstop beneath the distributed ticket lock: even if two requests both
//! pass the lock, only one can observe the ticket as unadmitted.

use crate::error::Result;
use crate::providers::{AdmissionStore, ScanAuditor};
use crate::types::{
    AdmissionContext, Attendee, CheckInRequest, Decision, EventDisplay, EventId, EventInfo,
    EventStats, EventSummary, NewScanRecord, Order, PaymentStatus, ScanHistoryEntry, ScanOutcome,
    TicketHistory, TicketId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

type OrderRow = (
    String,                          // ticket_id
    String,                          // event_id
    Vec<String>,                     // scope_tokens
    String,                          // payment_status
    i32,                             // quantity
    bool,                            // checked_in
    Option<DateTime<Utc>>,           // checked_in_at
    Option<String>,                  // checked_in_by
    Option<String>,                  // checked_in_gate
    Option<String>,                  // attendee_name
    Option<String>,                  // attendee_email
);

type EventRow = (
    String,                // id
    String,                // name
    String,                // venue
    DateTime<Utc>,         // date
    i32,                   // capacity
    i64,                   // price_cents
    bool,                  // is_active
    Option<String>,        // scope_token
    i32,                   // scan_order
);

const SELECT_ORDER: &str = "SELECT ticket_id, event_id, scope_tokens, payment_status, quantity, \
     checked_in, checked_in_at, checked_in_by, checked_in_gate, \
     attendee_name, attendee_email \
     FROM orders WHERE ticket_id = $1";

const SELECT_EVENT: &str = "SELECT id, name, venue, date, capacity, price_cents, is_active, \
     scope_token, scan_order \
     FROM events WHERE id = $1";

#[allow(clippy::cast_sign_loss)] // quantities are non-negative in this domain
fn map_order(row: OrderRow) -> Order {
    let (
        ticket_id,
        event_id,
        scope_tokens,
        payment_status,
        quantity,
        checked_in,
        checked_in_at,
        checked_in_by,
        checked_in_gate,
        attendee_name,
        attendee_email,
    ) = row;
    Order {
        ticket_id: TicketId::new(ticket_id),
        event_id: EventId::new(event_id),
        scope_tokens,
        payment_status: PaymentStatus::parse(&payment_status),
        quantity: quantity.max(0) as u32,
        checked_in,
        checked_in_at,
        checked_in_by,
        checked_in_gate,
        attendee: attendee_name.map(|name| Attendee {
            name,
            email: attendee_email.unwrap_or_default(),
        }),
    }
}

#[allow(clippy::cast_sign_loss)]
fn map_event(row: EventRow) -> EventInfo {
    let (id, name, venue, date, capacity, price_cents, is_active, scope_token, scan_order) = row;
    EventInfo {
        id: EventId::new(id),
        name,
        venue,
        date,
        capacity: capacity.max(0) as u32,
        price_cents,
        is_active,
        scope_token,
        scan_order,
    }
}

fn context_for(order: &Order, own_event: Option<&EventInfo>) -> AdmissionContext {
    // Display the event the attendee actually bought, not the gate they are
    // attempting.
    AdmissionContext {
        ticket_id: order.ticket_id.clone(),
        quantity: order.quantity,
        attendee: order.attendee.clone(),
        event: own_event.map(EventDisplay::from_info),
    }
}

/// Create the durable schema if it does not exist yet.
///
/// # Errors
///
/// Returns [`GateError::Database`] if any statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(include_str!("../../migrations/schema.sql"))
        .execute(pool)
        .await?;
    Ok(())
}

/// `PostgreSQL`-backed [`AdmissionStore`].
#[derive(Clone)]
pub struct PostgresAdmissionStore {
    pool: Arc<PgPool>,
}

impl PostgresAdmissionStore {
    /// Build over an existing connection pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Access the underlying pool, e.g. for readiness checks.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    /// Earliest `admitted` scan record for (ticket, event), if any. The gate
    /// id is resolved to its registered display name for gate staff.
    async fn prior_admission<'e, E>(
        executor: E,
        ticket_id: &TicketId,
        event_id: &EventId,
    ) -> Result<Option<(DateTime<Utc>, String, String)>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row: Option<(DateTime<Utc>, String, String)> = sqlx::query_as(
            "SELECT s.recorded_at, s.device_id, COALESCE(g.name, s.gate_id) \
             FROM scan_records s LEFT JOIN gates g ON g.id = s.gate_id \
             WHERE s.ticket_id = $1 AND s.event_id = $2 AND s.outcome = 'admitted' \
             ORDER BY s.recorded_at ASC LIMIT 1",
        )
        .bind(ticket_id.as_str())
        .bind(event_id.as_str())
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl AdmissionStore for PostgresAdmissionStore {
    #[tracing::instrument(skip(self, request), fields(ticket_id = %request.ticket_id))]
    async fn check_in(&self, request: &CheckInRequest) -> Result<Decision> {
        let mut tx = self.pool.begin().await?;

        // Row lock for the remainder of the transaction.
        let order_row: Option<OrderRow> = sqlx::query_as(&format!("{SELECT_ORDER} FOR UPDATE"))
            .bind(request.ticket_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(order) = order_row.map(map_order) else {
            return Ok(Decision::NotFound);
        };

        let own_event: Option<EventInfo> = sqlx::query_as::<_, EventRow>(SELECT_EVENT)
            .bind(order.event_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .map(map_event);
        let context = context_for(&order, own_event.as_ref());

        // Resolve the gate's expected event, when the gate is scoped.
        let expected_event = match &request.expected_event_id {
            Some(id) => {
                let row: Option<EventRow> = sqlx::query_as(SELECT_EVENT)
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                match row.map(map_event) {
                    Some(event) => Some(event),
                    None => {
                        return Ok(Decision::WrongEvent {
                            context: Some(context),
                        });
                    }
                }
            }
            None => None,
        };

        if let Some(event) = &expected_event {
            if !order.grants_access_to(event) {
                return Ok(Decision::WrongEvent {
                    context: Some(context),
                });
            }
        }

        let resolved_event_id = expected_event
            .as_ref()
            .map_or(&order.event_id, |e| &e.id)
            .clone();

        if let Some((admitted_at, device, gate)) =
            Self::prior_admission(&mut *tx, &order.ticket_id, &resolved_event_id).await?
        {
            return Ok(Decision::AlreadyAdmitted {
                admitted_at: Some(admitted_at),
                admitted_by: Some(device),
                admitted_by_gate: Some(gate),
                context: Some(context),
            });
        }

        if order.payment_status != PaymentStatus::Paid {
            return Ok(Decision::NotPaid {
                context: Some(context),
            });
        }

        let now = Utc::now();

        // Legacy marker, written idempotently for dashboard display only.
        sqlx::query(
            "UPDATE orders SET checked_in = TRUE, \
             checked_in_at = COALESCE(checked_in_at, $2), \
             checked_in_by = COALESCE(checked_in_by, $3), \
             checked_in_gate = COALESCE(checked_in_gate, $4), \
             updated_at = $2 \
             WHERE ticket_id = $1",
        )
        .bind(order.ticket_id.as_str())
        .bind(now)
        .bind(request.device_id.as_str())
        .bind(request.gate_id.as_str())
        .execute(&mut *tx)
        .await?;

        // The admitted record commits with the grant, so prior-admission
        // lookups can never miss a committed grant.
        sqlx::query(
            "INSERT INTO scan_records \
             (ticket_id, event_id, outcome, device_id, gate_id, recorded_at) \
             VALUES ($1, $2, 'admitted', $3, $4, $5)",
        )
        .bind(order.ticket_id.as_str())
        .bind(resolved_event_id.as_str())
        .bind(request.device_id.as_str())
        .bind(request.gate_id.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            ticket_id = %order.ticket_id,
            event_id = %resolved_event_id,
            device_id = %request.device_id,
            gate_id = %request.gate_id,
            "Ticket admitted"
        );

        Ok(Decision::Admitted {
            admitted_at: now,
            context,
        })
    }

    async fn validate(
        &self,
        ticket_id: &TicketId,
        expected_event_id: Option<&EventId>,
    ) -> Result<Decision> {
        let pool = self.pool.as_ref();

        let order_row: Option<OrderRow> = sqlx::query_as(SELECT_ORDER)
            .bind(ticket_id.as_str())
            .fetch_optional(pool)
            .await?;
        let Some(order) = order_row.map(map_order) else {
            return Ok(Decision::NotFound);
        };

        let own_event: Option<EventInfo> = sqlx::query_as::<_, EventRow>(SELECT_EVENT)
            .bind(order.event_id.as_str())
            .fetch_optional(pool)
            .await?
            .map(map_event);
        let context = context_for(&order, own_event.as_ref());

        let expected_event = match expected_event_id {
            Some(id) => {
                let row: Option<EventRow> = sqlx::query_as(SELECT_EVENT)
                    .bind(id.as_str())
                    .fetch_optional(pool)
                    .await?;
                match row.map(map_event) {
                    Some(event) => Some(event),
                    None => {
                        return Ok(Decision::WrongEvent {
                            context: Some(context),
                        });
                    }
                }
            }
            None => None,
        };

        if let Some(event) = &expected_event {
            if !order.grants_access_to(event) {
                return Ok(Decision::WrongEvent {
                    context: Some(context),
                });
            }
        }

        let resolved_event_id = expected_event
            .as_ref()
            .map_or(&order.event_id, |e| &e.id)
            .clone();

        if let Some((admitted_at, device, gate)) =
            Self::prior_admission(pool, &order.ticket_id, &resolved_event_id).await?
        {
            return Ok(Decision::AlreadyAdmitted {
                admitted_at: Some(admitted_at),
                admitted_by: Some(device),
                admitted_by_gate: Some(gate),
                context: Some(context),
            });
        }

        if order.payment_status != PaymentStatus::Paid {
            return Ok(Decision::NotPaid {
                context: Some(context),
            });
        }

        // "Would be admitted" — no mutation on the read-only path.
        Ok(Decision::Admitted {
            admitted_at: Utc::now(),
            context,
        })
    }

    async fn get_order(&self, ticket_id: &TicketId) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(SELECT_ORDER)
            .bind(ticket_id.as_str())
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(map_order))
    }

    async fn history(&self, ticket_id: &TicketId) -> Result<Option<TicketHistory>> {
        let pool = self.pool.as_ref();

        let order_row: Option<OrderRow> = sqlx::query_as(SELECT_ORDER)
            .bind(ticket_id.as_str())
            .fetch_optional(pool)
            .await?;
        let Some(order) = order_row.map(map_order) else {
            return Ok(None);
        };

        let event_rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, name, venue, date, capacity, price_cents, is_active, \
             scope_token, scan_order \
             FROM events \
             WHERE id = $1 OR (scope_token IS NOT NULL AND scope_token = ANY($2)) \
             ORDER BY scan_order ASC, date ASC, name ASC",
        )
        .bind(order.event_id.as_str())
        .bind(&order.scope_tokens)
        .fetch_all(pool)
        .await?;

        let purchased_events = event_rows
            .into_iter()
            .map(map_event)
            .map(|e| EventSummary {
                id: e.id,
                name: e.name,
                venue: e.venue,
                scope_token: e.scope_token,
            })
            .collect();

        let scan_rows: Vec<(
            String,
            String,
            String,
            DateTime<Utc>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT s.outcome, s.device_id, s.gate_id, s.recorded_at, \
             e.id, e.name, e.venue, e.scope_token \
             FROM scan_records s LEFT JOIN events e ON e.id = s.event_id \
             WHERE s.ticket_id = $1 \
             ORDER BY s.recorded_at DESC",
        )
        .bind(order.ticket_id.as_str())
        .fetch_all(pool)
        .await?;

        let scans: Vec<ScanHistoryEntry> = scan_rows
            .into_iter()
            .map(
                |(outcome, device_id, gate_id, recorded_at, ev_id, ev_name, ev_venue, scope)| {
                    ScanHistoryEntry {
                        outcome: ScanOutcome::parse(&outcome).unwrap_or(ScanOutcome::Invalid),
                        device_id: crate::types::DeviceId::new(device_id),
                        gate_id: crate::types::GateId::new(gate_id),
                        recorded_at,
                        event: ev_id.map(|id| EventSummary {
                            id: EventId::new(id),
                            name: ev_name.unwrap_or_default(),
                            venue: ev_venue.unwrap_or_default(),
                            scope_token: scope,
                        }),
                    }
                },
            )
            .collect();

        Ok(Some(TicketHistory {
            ticket_id: order.ticket_id,
            attendee: order.attendee,
            purchased_events,
            last_scanned_at: scans.first().map(|s| s.recorded_at),
            scans,
        }))
    }

    #[allow(clippy::cast_sign_loss)]
    async fn event_stats(&self, event_id: &EventId) -> Result<Option<EventStats>> {
        let pool = self.pool.as_ref();

        let event_row: Option<EventRow> = sqlx::query_as(SELECT_EVENT)
            .bind(event_id.as_str())
            .fetch_optional(pool)
            .await?;
        let Some(event) = event_row.map(map_event) else {
            return Ok(None);
        };

        let (sold, revenue): (i64, i64) = match &event.scope_token {
            Some(token) => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(quantity), 0)::BIGINT, \
                     COALESCE(SUM(total_cents), 0)::BIGINT \
                     FROM orders WHERE payment_status = 'paid' AND $1 = ANY(scope_tokens)",
                )
                .bind(token)
                .fetch_one(pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(quantity), 0)::BIGINT, \
                     COALESCE(SUM(total_cents), 0)::BIGINT \
                     FROM orders WHERE payment_status = 'paid' AND event_id = $1",
                )
                .bind(event.id.as_str())
                .fetch_one(pool)
                .await?
            }
        };

        let (checked_in,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(o.quantity), 0)::BIGINT \
             FROM scan_records s JOIN orders o ON o.ticket_id = s.ticket_id \
             WHERE s.event_id = $1 AND s.outcome = 'admitted'",
        )
        .bind(event.id.as_str())
        .fetch_one(pool)
        .await?;

        Ok(Some(EventStats {
            capacity_remaining: u64::from(event.capacity).saturating_sub(sold.max(0) as u64),
            event,
            tickets_sold: sold.max(0) as u64,
            checked_in: checked_in.max(0) as u64,
            revenue_cents: revenue,
        }))
    }

    async fn mark_paid(&self, ticket_id: &TicketId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET payment_status = 'paid', updated_at = NOW() WHERE ticket_id = $1",
        )
        .bind(ticket_id.as_str())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// `PostgreSQL`-backed [`ScanAuditor`]: plain append, no reads.
#[derive(Clone)]
pub struct PostgresScanAuditor {
    pool: Arc<PgPool>,
}

impl PostgresScanAuditor {
    /// Build over an existing connection pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanAuditor for PostgresScanAuditor {
    async fn record(&self, record: &NewScanRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_records \
             (ticket_id, event_id, outcome, device_id, gate_id, ip_address, user_agent, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(record.ticket_id.as_str())
        .bind(record.event_id.as_ref().map(EventId::as_str))
        .bind(record.outcome.as_str())
        .bind(record.device_id.as_str())
        .bind(record.gate_id.as_str())
        .bind(record.ip_address.as_deref())
        .bind(record.user_agent.as_deref())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
