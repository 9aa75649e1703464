//! Production store implementations: Redis for the ephemeral coordination
//! state (lock, outcome cache, rate counters) and `PostgreSQL` for the
//! durable admission transaction and audit trail.

mod cache_redis;
mod lock_redis;
mod postgres;
mod rate_limiter_redis;

pub use cache_redis::RedisOutcomeCache;
pub use lock_redis::RedisTicketLock;
pub use postgres::{PostgresAdmissionStore, PostgresScanAuditor, ensure_schema};
pub use rate_limiter_redis::RedisRateLimiter;
