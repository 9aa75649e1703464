//! HTTP API: request/response types, handlers and the error bridge.

pub mod error;
pub mod scan;

pub use error::AppError;
