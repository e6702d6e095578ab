//! In-memory storage for tests.
//!
//! Behaves like the Postgres stores for ordering, claim exclusivity and
//! counter semantics, and supports injecting failures to simulate an
//! unreachable store.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{KeyStore, StoreError, StoreFuture, WorkQueue, lease_cutoff};
use crate::models::{
    api_key::ApiKeyRecord,
    work_item::{ClaimedItem, WorkItem},
};

/// In-memory `KeyStore`.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyStore {
    records: Arc<RwLock<HashMap<String, ApiKeyRecord>>>,
    usage_error: Arc<RwLock<Option<String>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key record.
    pub async fn insert(&self, record: ApiKeyRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Current state of a key record.
    pub async fn get(&self, id: &str) -> Option<ApiKeyRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Make every subsequent `record_usage` call fail with `error`.
    pub async fn fail_usage_updates(&self, error: impl Into<String>) {
        *self.usage_error.write().await = Some(error.into());
    }
}

impl KeyStore for MemoryKeyStore {
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ApiKeyRecord>> {
        Box::pin(async move { Ok(self.records.read().await.get(id).cloned()) })
    }

    fn record_usage<'a>(
        &'a self,
        id: &'a str,
        host: Option<&'a str>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Some(error) = self.usage_error.read().await.clone() {
                return Err(StoreError::Unavailable(error));
            }

            let mut records = self.records.write().await;
            let record = records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("api key {id}")))?;

            record.usage.times_used += 1;
            record.usage.last_used = record.usage.last_used.max(Some(at));
            if let Some(host) = host {
                record.usage.last_host = Some(host.to_string());
            }

            Ok(())
        })
    }
}

/// Queue entry with its bookkeeping.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub item: WorkItem,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// In-memory `WorkQueue`.
#[derive(Debug, Default, Clone)]
pub struct MemoryWorkQueue {
    entries: Arc<Mutex<Vec<MemoryEntry>>>,
    append_error: Arc<RwLock<Option<String>>>,
    claim_error: Arc<RwLock<Option<String>>>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, failed ones included.
    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().await.clone()
    }

    /// Items not parked as failed, in insertion order.
    pub async fn items(&self) -> Vec<WorkItem> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.failed_at.is_none())
            .map(|entry| entry.item.clone())
            .collect()
    }

    /// Make every subsequent `append` fail with `error`.
    pub async fn fail_appends(&self, error: impl Into<String>) {
        *self.append_error.write().await = Some(error.into());
    }

    /// Make the next `claim_next` fail with `error`.
    pub async fn inject_claim_error(&self, error: impl Into<String>) {
        *self.claim_error.write().await = Some(error.into());
    }

    /// Settle an entry only if `claimed` still holds it.
    async fn settle<F>(&self, claimed: &ClaimedItem, apply: F) -> bool
    where
        F: FnOnce(&mut Vec<MemoryEntry>, usize),
    {
        let mut entries = self.entries.lock().await;
        let position = entries.iter().position(|entry| {
            entry.id == claimed.id && entry.claimed_at == Some(claimed.claimed_at)
        });

        match position {
            Some(index) => {
                apply(&mut entries, index);
                true
            }
            None => false,
        }
    }
}

impl WorkQueue for MemoryWorkQueue {
    fn append<'a>(&'a self, item: &'a WorkItem) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            if let Some(error) = self.append_error.read().await.clone() {
                return Err(StoreError::Unavailable(error));
            }

            let id = Uuid::new_v4();
            self.entries.lock().await.push(MemoryEntry {
                id,
                item: item.clone(),
                attempts: 0,
                claimed_at: None,
                failed_at: None,
                last_error: None,
            });

            Ok(id)
        })
    }

    fn claim_next(&self, lease: Duration) -> StoreFuture<'_, Option<ClaimedItem>> {
        Box::pin(async move {
            if let Some(error) = self.claim_error.write().await.take() {
                return Err(StoreError::Unavailable(error));
            }

            let now = Utc::now();
            let cutoff = lease_cutoff(now, lease);

            // The lock is held across select and mark, like the row lock in Postgres
            let mut entries = self.entries.lock().await;
            let oldest = entries
                .iter_mut()
                .filter(|entry| entry.failed_at.is_none())
                .filter(|entry| entry.claimed_at.is_none_or(|claimed_at| claimed_at < cutoff))
                .min_by_key(|entry| entry.item.requested_at);

            Ok(oldest.map(|entry| {
                entry.claimed_at = Some(now);
                entry.attempts += 1;
                ClaimedItem {
                    id: entry.id,
                    item: entry.item.clone(),
                    attempts: entry.attempts,
                    claimed_at: now,
                }
            }))
        })
    }

    fn complete<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .settle(claimed, |entries, index| {
                    entries.remove(index);
                })
                .await)
        })
    }

    fn release<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .settle(claimed, |entries, index| entries[index].claimed_at = None)
                .await)
        })
    }

    fn fail<'a>(&'a self, claimed: &'a ClaimedItem, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .settle(claimed, |entries, index| {
                    entries[index].failed_at = Some(Utc::now());
                    entries[index].last_error = Some(reason.to_string());
                })
                .await)
        })
    }

    fn pending_count(&self) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            let pending = entries.iter().filter(|entry| entry.failed_at.is_none()).count();
            Ok(i64::try_from(pending).unwrap_or(i64::MAX))
        })
    }

    fn ensure_indices(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn item(email: &str, requested_at: DateTime<Utc>) -> WorkItem {
        WorkItem {
            key_id: "k".to_string(),
            email: email.to_string(),
            first_name: "Friendly".to_string(),
            last_name: "Human".to_string(),
            external_link: "course".to_string(),
            integration_id: "offer-1".to_string(),
            requested_at,
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn claims_oldest_item_first() {
        let queue = MemoryWorkQueue::new();
        let now = Utc::now();
        queue.append(&item("newer@example.com", now)).await.unwrap();
        queue
            .append(&item("older@example.com", now - chrono::Duration::seconds(30)))
            .await
            .unwrap();

        let claimed = queue.claim_next(Duration::from_secs(60)).await.unwrap().unwrap();

        assert_eq!(claimed.item.email, "older@example.com");
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn claimed_item_is_invisible_until_released() {
        let queue = MemoryWorkQueue::new();
        queue.append(&item("a@example.com", Utc::now())).await.unwrap();
        let lease = Duration::from_secs(60);

        let claimed = queue.claim_next(lease).await.unwrap().unwrap();
        assert!(queue.claim_next(lease).await.unwrap().is_none());

        assert!(queue.release(&claimed).await.unwrap());
        let again = queue.claim_next(lease).await.unwrap().unwrap();
        assert_eq!(again.id, claimed.id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn expired_lease_makes_item_claimable_and_voids_old_claim() {
        let queue = MemoryWorkQueue::new();
        queue.append(&item("a@example.com", Utc::now())).await.unwrap();

        let first = queue.claim_next(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.claim_next(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert!(!queue.complete(&first).await.unwrap());
        assert!(queue.complete(&second).await.unwrap());
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_items_are_kept_but_never_claimed() {
        let queue = MemoryWorkQueue::new();
        queue.append(&item("a@example.com", Utc::now())).await.unwrap();

        let claimed = queue.claim_next(Duration::from_secs(60)).await.unwrap().unwrap();
        assert!(queue.fail(&claimed, "rejected").await.unwrap());

        assert!(queue.claim_next(Duration::ZERO).await.unwrap().is_none());
        let entries = queue.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].last_error.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn usage_never_moves_last_used_backwards() {
        let keys = MemoryKeyStore::new();
        keys.insert(ApiKeyRecord::new("k")).await;
        let now = Utc::now();

        keys.record_usage("k", Some("10.0.0.1"), now).await.unwrap();
        keys.record_usage("k", None, now - chrono::Duration::hours(1))
            .await
            .unwrap();

        let usage = keys.get("k").await.unwrap().usage;
        assert_eq!(usage.times_used, 2);
        assert_eq!(usage.last_used, Some(now));
        assert_eq!(usage.last_host.as_deref(), Some("10.0.0.1"));
    }
}
