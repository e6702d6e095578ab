//! HTTP request handlers (route handlers).
//!
//! Each handler receives the request data, delegates to a service, and
//! returns the standard status envelope.

/// Liveness and queue depth
pub mod health;
/// Purchase notification webhook
pub mod ingest;
