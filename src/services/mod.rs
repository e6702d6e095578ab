//! Business logic services.
//!
//! Services hold the ingestion and provisioning logic separated from HTTP
//! handlers and binaries.

pub mod ingest_service;
pub mod provisioner;
pub mod queue_worker;
