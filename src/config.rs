//! Application configuration management.
//!
//! Configuration is read once from environment variables (and an optional
//! `.env` file) using `envy`, then passed explicitly into the components
//! that need it.

use std::time::Duration;

use serde::Deserialize;

/// Ingestion server configuration.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `RESTRICT_HOSTS` (optional): only accept keys from their listed hosts, defaults to false
/// - `DEFAULT_FIRST_NAME` / `DEFAULT_LAST_NAME` (optional): substituted for missing names
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `VERBOSE` (optional): debug logging when `RUST_LOG` is unset
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default)]
    pub restrict_hosts: bool,

    #[serde(default = "default_first_name")]
    pub default_first_name: String,

    #[serde(default = "default_last_name")]
    pub default_last_name: String,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default)]
    pub verbose: bool,
}

/// Queue worker configuration.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required)
/// - `PROVISION_URL` (required): downstream endpoint receiving work items
/// - `PROVISION_SECRET` (required): HMAC key for the request signature
/// - `PROVISION_TIMEOUT_SECS`: per-request timeout, defaults to 10
/// - `WORKER_BATCH_SIZE`: items claimed per pass, defaults to 10
/// - `WORKER_MAX_ATTEMPTS`: claims before a retryable item is parked, defaults to 5
/// - `WORKER_LEASE_SECS`: claim lease, defaults to 300
/// - `WORKER_BACKOFF_MIN_SECS` / `WORKER_BACKOFF_MAX_SECS`: idle sleep range, defaults to 5 and 10
/// - `WORKER_ONESHOT`: run a single pass and exit, defaults to false
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub database_url: String,

    pub provision_url: String,

    pub provision_secret: String,

    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub worker_batch_size: usize,

    #[serde(default = "default_max_attempts")]
    pub worker_max_attempts: i32,

    #[serde(default = "default_lease")]
    pub worker_lease_secs: u64,

    #[serde(default = "default_backoff_min")]
    pub worker_backoff_min_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub worker_backoff_max_secs: u64,

    #[serde(default)]
    pub worker_oneshot: bool,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default)]
    pub verbose: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_first_name() -> String {
    "Friendly".to_string()
}

fn default_last_name() -> String {
    "Human".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_provision_timeout() -> u64 {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_max_attempts() -> i32 {
    5
}

fn default_lease() -> u64 {
    300
}

fn default_backoff_min() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a value cannot be
    /// parsed into its expected type.
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }
}

impl WorkerConfig {
    /// Load worker configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<WorkerConfig>()
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.worker_lease_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }
}

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}
