//! PostgreSQL implementations of the storage traits.
//!
//! # Concurrency
//!
//! Queue claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE`
//! statement, so any number of worker processes can poll the same table
//! without blocking each other or claiming the same row.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::{KeyStore, StoreError, StoreFuture, WorkQueue, lease_cutoff};
use crate::{
    db::DbPool,
    models::{
        api_key::{ApiKeyRecord, ApiKeyRow},
        work_item::{ClaimedItem, WorkItem, WorkItemRow},
    },
};

/// `api_keys` table access.
#[derive(Debug, Clone)]
pub struct PgKeyStore {
    pool: DbPool,
}

impl PgKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl KeyStore for PgKeyStore {
    fn find_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ApiKeyRecord>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, ApiKeyRow>(
                r#"
                SELECT id, disabled, allowed_hosts, integration_links,
                       last_used, times_used, last_host
                FROM api_keys
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            Ok(row.map(ApiKeyRecord::from))
        })
    }

    fn record_usage<'a>(
        &'a self,
        id: &'a str,
        host: Option<&'a str>,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            // GREATEST skips NULL, so the first use simply sets the timestamp
            let updated = sqlx::query(
                r#"
                UPDATE api_keys
                SET times_used = times_used + 1,
                    last_used = GREATEST(last_used, $2),
                    last_host = COALESCE($3, last_host)
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(at)
            .bind(host)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(StoreError::NotFound(format!("api key {id}")));
            }

            Ok(())
        })
    }
}

/// `work_items` table access.
#[derive(Debug, Clone)]
pub struct PgWorkQueue {
    pool: DbPool,
}

impl PgWorkQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Shared body of `complete`, `release` and `fail`: each statement only
    /// touches the row while the caller's claim is still the current one.
    async fn settle(&self, sql: &str, claimed: &ClaimedItem, reason: Option<&str>) -> Result<bool, StoreError> {
        let mut query = sqlx::query(sql).bind(claimed.id).bind(claimed.claimed_at);
        if let Some(reason) = reason {
            query = query.bind(reason);
        }

        let affected = query.execute(&self.pool).await?.rows_affected();

        Ok(affected == 1)
    }
}

impl WorkQueue for PgWorkQueue {
    fn append<'a>(&'a self, item: &'a WorkItem) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO work_items (
                    id, key_id, email, first_name, last_name,
                    external_link, integration_id, requested_at, extra
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&item.key_id)
            .bind(&item.email)
            .bind(&item.first_name)
            .bind(&item.last_name)
            .bind(&item.external_link)
            .bind(&item.integration_id)
            .bind(item.requested_at)
            .bind(Json(&item.extra))
            .fetch_one(&self.pool)
            .await?;

            Ok(id)
        })
    }

    fn claim_next(&self, lease: Duration) -> StoreFuture<'_, Option<ClaimedItem>> {
        Box::pin(async move {
            let now = Utc::now();

            let row = sqlx::query_as::<_, WorkItemRow>(
                r#"
                UPDATE work_items
                SET claimed_at = $1,
                    attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM work_items
                    WHERE failed_at IS NULL
                      AND (claimed_at IS NULL OR claimed_at < $2)
                    ORDER BY requested_at ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, key_id, email, first_name, last_name, external_link,
                          integration_id, requested_at, extra, attempts, claimed_at
                "#,
            )
            .bind(now)
            .bind(lease_cutoff(now, lease))
            .fetch_optional(&self.pool)
            .await?;

            // claimed_at comes back at database precision, which is what the
            // settle statements compare against
            Ok(row.map(|row| row.into_claimed(now)))
        })
    }

    fn complete<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool> {
        Box::pin(self.settle(
            "DELETE FROM work_items WHERE id = $1 AND claimed_at = $2",
            claimed,
            None,
        ))
    }

    fn release<'a>(&'a self, claimed: &'a ClaimedItem) -> StoreFuture<'a, bool> {
        Box::pin(self.settle(
            "UPDATE work_items SET claimed_at = NULL WHERE id = $1 AND claimed_at = $2",
            claimed,
            None,
        ))
    }

    fn fail<'a>(&'a self, claimed: &'a ClaimedItem, reason: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.settle(
            r#"
            UPDATE work_items
            SET failed_at = NOW(), last_error = $3
            WHERE id = $1 AND claimed_at = $2
            "#,
            claimed,
            Some(reason),
        ))
    }

    fn pending_count(&self) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let count =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM work_items WHERE failed_at IS NULL")
                    .fetch_one(&self.pool)
                    .await?;

            Ok(count)
        })
    }

    fn ensure_indices(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS work_items_requested_at_idx ON work_items (requested_at ASC)",
            )
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }
}
