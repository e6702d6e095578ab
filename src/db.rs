//! Database connection pool and schema management.
//!
//! This module provides utilities for:
//! - Creating and managing a PostgreSQL connection pool
//! - Running database migrations automatically
//! - Ensuring the queue scan index exists

use sqlx::{Pool, Postgres};

use crate::store::{StoreError, WorkQueue};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// Request handlers share the pool; the store traits are safe for concurrent
/// use because every operation is a single atomic statement.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in `_sqlx_migrations`, so each runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Prepare the queue for oldest-first scans.
///
/// Idempotent; both the server and the worker call it at startup.
pub async fn prepare_queue(queue: &dyn WorkQueue) -> Result<(), StoreError> {
    queue.ensure_indices().await?;
    tracing::info!("Queue indices ensured");
    Ok(())
}
