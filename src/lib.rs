//! Admission control core for event gate scanners.
//!
//! A scanner presents a signed ticket token; this crate decides, exactly
//! once per (ticket, event), whether the holder gets in. The moving parts:
//!
//! - [`token::TokenCodec`] — stateless signed-token encode/decode
//! - [`providers`] — the trait seams: distributed ticket lock, negative
//!   outcome cache, per-device rate limiter, durable admission store,
//!   append-only scan auditor
//! - [`stores`] — Redis and `PostgreSQL` implementations of those seams
//! - [`service::AdmissionService`] — the orchestrator: rate gate, decode,
//!   cache fast path, lock, transaction, audit, release
//! - [`api`]/[`server`] — the HTTP surface scanners talk to
//!
//! Business outcomes are [`types::Decision`] values, never errors.
//! Infrastructure failures are [`error::GateError`] and always fail closed:
//! a store outage denies admission, it never degrades into an unguarded
//! grant.

pub mod api;
pub mod config;
pub mod error;
pub mod mocks;
pub mod providers;
pub mod server;
pub mod service;
pub mod stores;
pub mod token;
pub mod types;

pub use config::Config;
pub use error::{GateError, Result};
pub use service::AdmissionService;
pub use token::{TokenCodec, TokenError};
pub use types::{Decision, DeviceId, EventId, GateId, TicketId, VerifyRequest};
