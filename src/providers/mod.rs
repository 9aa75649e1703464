//! Trait seams between the admission orchestrator and its backing stores.
//!
//! Every collaborator is injected into [`crate::service::AdmissionService`]
//! as a trait object, so production wiring (Redis + `PostgreSQL`) and test
//! doubles ([`crate::mocks`]) are interchangeable.

mod cache;
mod lock;
mod rate_limiter;
mod store;

pub use cache::OutcomeCache;
pub use lock::TicketLock;
pub use rate_limiter::RateLimiter;
pub use store::{AdmissionStore, ScanAuditor};
