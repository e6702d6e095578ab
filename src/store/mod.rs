//! Storage seams for API keys and the provisioning queue.
//!
//! Handlers and the worker only see the `KeyStore` and `WorkQueue` traits.
//! Every mutation is a single-row atomic statement; nothing here spans
//! multiple records, so a failed call never leaves a record half-updated.
//!
//! Two implementations are provided:
//! - [`postgres`]: production storage on a sqlx `PgPool`
//! - [`memory`]: in-process storage with fault injection, used by tests

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    api_key::ApiKeyRecord,
    work_item::{ClaimedItem, WorkItem},
};

pub mod memory;
pub mod postgres;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors raised by the key store or the work queue.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The addressed record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Lookup and usage accounting for API keys.
pub trait KeyStore: Send + Sync + 'static {
    /// Fetch a key record by its key string.
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ApiKeyRecord>>;

    /// Atomically increment `times_used`, move `last_used` forward to `at`
    /// (never backwards) and remember the caller's address.
    fn record_usage<'a>(
        &'a self,
        id: &'a str,
        host: Option<&'a str>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;
}

/// Durable, time-ordered queue of provisioning work.
pub trait WorkQueue: Send + Sync + 'static {
    /// Persist a new item and return its queue identifier.
    fn append<'a>(&'a self, item: &'a WorkItem) -> StoreFuture<'a, Uuid>;

    /// Atomically claim the oldest eligible item by `requested_at`.
    ///
    /// Eligible means not failed and either unclaimed or claimed longer ago
    /// than `lease`. Two concurrent callers never receive the same item
    /// within one lease.
    fn claim_next(&self, lease: Duration) -> StoreFuture<'_, Option<ClaimedItem>>;

    /// Remove a processed item. Returns `false` if the claim was lost.
    fn complete<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool>;

    /// Give the claim back so the item can be retried. Returns `false` if
    /// the claim was lost.
    fn release<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool>;

    /// Park an item that can never be provisioned. Parked items are kept for
    /// inspection but never claimed again.
    fn fail<'a>(&'a self, claimed: &'a ClaimedItem, reason: &'a str) -> StoreFuture<'a, bool>;

    /// Number of items that are not parked as failed.
    fn pending_count(&self) -> StoreFuture<'_, i64>;

    /// Ensure the `requested_at` index exists. Safe to call on every startup.
    fn ensure_indices(&self) -> StoreFuture<'_, ()>;
}

/// Claims taken before this instant have expired.
pub(crate) fn lease_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
