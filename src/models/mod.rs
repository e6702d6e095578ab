//! Data models for keys, queued work and response bodies.

/// API key authentication model
pub mod api_key;
/// Response envelope
pub mod status;
/// Provisioning queue items
pub mod work_item;
