//! HTTP middleware components.
//!
//! - [`auth`]: API key gate with best-effort usage accounting
//! - [`trace`]: request spans with the API key redacted from the URI

/// API key authentication middleware
pub mod auth;
/// Request tracing
pub mod trace;
