//! Queued provisioning work.
//!
//! This module defines:
//! - `WorkItem`: The normalized account request handed to downstream provisioning
//! - `ClaimedItem`: A `WorkItem` together with its queue bookkeeping
//! - `WorkItemRow`: Row shape of the `work_items` table

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// An account that must be provisioned downstream.
///
/// Created only by the ingest endpoint and only removed or parked by the
/// queue worker.
///
/// # JSON Example
///
/// ```json
/// {
///   "key_id": "3f9c...",
///   "email": "ada@example.com",
///   "first_name": "Ada",
///   "last_name": "Human",
///   "external_link": "intro-course",
///   "integration_id": "offer-123",
///   "requested_at": "2026-01-15T10:30:00Z",
///   "extra": { "price": "2900" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Key that submitted this item
    pub key_id: String,

    /// Never empty
    pub email: String,

    pub first_name: String,

    pub last_name: String,

    /// Product permalink from the notification
    pub external_link: String,

    /// Downstream product identifier resolved from the key's integration links
    pub integration_id: String,

    /// Enqueue time; the queue is scanned oldest first on this field
    pub requested_at: DateTime<Utc>,

    /// Notification fields with no dedicated column, kept verbatim
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A work item held by a worker.
///
/// The claim is a lease: if the worker neither completes, releases nor fails
/// the item before the lease expires, another worker may claim it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    /// Queue identifier, also sent downstream as the idempotency key
    pub id: Uuid,

    pub item: WorkItem,

    /// Number of times this item has been claimed, including this claim
    pub attempts: i32,

    pub claimed_at: DateTime<Utc>,
}

/// Row shape of the `work_items` table.
#[derive(Debug, sqlx::FromRow)]
pub struct WorkItemRow {
    pub id: Uuid,
    pub key_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub external_link: String,
    pub integration_id: String,
    pub requested_at: DateTime<Utc>,
    pub extra: Json<BTreeMap<String, String>>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl WorkItemRow {
    /// Convert a freshly claimed row. Rows returned by a claim always carry
    /// `claimed_at`; `fallback` covers the impossible case.
    pub fn into_claimed(self, fallback: DateTime<Utc>) -> ClaimedItem {
        ClaimedItem {
            id: self.id,
            attempts: self.attempts,
            claimed_at: self.claimed_at.unwrap_or(fallback),
            item: WorkItem {
                key_id: self.key_id,
                email: self.email,
                first_name: self.first_name,
                last_name: self.last_name,
                external_link: self.external_link,
                integration_id: self.integration_id,
                requested_at: self.requested_at,
                extra: self.extra.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_fields_serialize_alongside_the_item() {
        let item = WorkItem {
            key_id: "k".to_string(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Human".to_string(),
            external_link: "course".to_string(),
            integration_id: "offer-1".to_string(),
            requested_at: Utc::now(),
            extra: BTreeMap::from([("price".to_string(), "2900".to_string())]),
        };

        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["email"], "ada@example.com");
        assert_eq!(value["extra"]["price"], "2900");
    }
}
