//! Gumjabi - purchase notification gateway.
//!
//! Accepts purchase webhooks from third-party stores, authenticates them with
//! a per-integration API key, and queues a normalized work item describing an
//! account to provision downstream. A separate worker drains the queue.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: PostgreSQL with sqlx, behind the `KeyStore` and `WorkQueue` traits
//! - **Authentication**: API key in the `key` query parameter, optional host allow-list
//! - **Provisioning**: signed HTTP forwarding with retry classification
//!
//! # Flow
//!
//! ```text
//! client -> AuthGate -> ingest handler -> WorkQueue::append
//! QueueWorker::poll -> WorkQueue::claim_next -> Provisioner -> complete | release | fail
//! ```

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use tracing_subscriber::EnvFilter;

/// Initialize logging. Reads `RUST_LOG`, falling back to `info` (or `debug`
/// when verbose).
pub fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config::default_log_filter(verbose).into()),
        )
        .init();
}
