//! API key model for integration authentication.
//!
//! Each integration (for example a Gumroad store) is issued one key. The key
//! string itself is the primary identifier and is passed by the caller as the
//! `key` query parameter. Keys are created and disabled out of band.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Represents an API key record.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: The key string (primary key, immutable)
/// - `disabled`: Whether the key has been revoked
/// - `allowed_hosts`: Caller addresses permitted when host restriction is on
/// - `integration_links`: JSONB map of external permalink to integration id
/// - `last_used`, `times_used`, `last_host`: Usage accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// The key string, unique and never rewritten once created
    pub id: String,

    /// Disabled keys are rejected during authentication without deleting the record.
    pub disabled: bool,

    /// Caller addresses allowed to use this key.
    ///
    /// Only consulted when the deployment enables host restriction.
    pub allowed_hosts: BTreeSet<String>,

    /// External product permalinks this key may submit, mapped to the
    /// identifier of the product in the downstream integration.
    pub integration_links: HashMap<String, String>,

    /// Best-effort usage counters
    pub usage: KeyUsage,
}

/// Usage accounting for a key.
///
/// `times_used` only grows and `last_used` only moves forward; the store
/// applies both as a single atomic update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsage {
    pub last_used: Option<DateTime<Utc>>,
    pub times_used: i64,
    /// Caller address observed on the most recent accounted request
    pub last_host: Option<String>,
}

impl ApiKeyRecord {
    /// Create an enabled key with no host or link entries.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            disabled: false,
            allowed_hosts: BTreeSet::new(),
            integration_links: HashMap::new(),
            usage: KeyUsage::default(),
        }
    }

    /// Add an entitled permalink.
    pub fn with_link(mut self, permalink: impl Into<String>, integration_id: impl Into<String>) -> Self {
        self.integration_links
            .insert(permalink.into(), integration_id.into());
        self
    }

    /// Add an allowed caller address.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into());
        self
    }

    /// Whether a caller at `host` may use this key when host restriction is
    /// on. The caller's address must be known and listed, so a key with no
    /// hosts is refused everywhere.
    pub fn allows_host(&self, host: Option<&str>) -> bool {
        host.is_some_and(|host| self.allowed_hosts.contains(host))
    }

    /// Integration identifier for an external permalink, if this key is entitled to it.
    ///
    /// Empty identifiers count as absent.
    pub fn integration_for(&self, permalink: &str) -> Option<&str> {
        self.integration_links
            .get(permalink)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// Row shape of the `api_keys` table.
#[derive(Debug, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: String,
    pub disabled: bool,
    pub allowed_hosts: Vec<String>,
    pub integration_links: Json<HashMap<String, String>>,
    pub last_used: Option<DateTime<Utc>>,
    pub times_used: i64,
    pub last_host: Option<String>,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        Self {
            id: row.id,
            disabled: row.disabled,
            allowed_hosts: row.allowed_hosts.into_iter().collect(),
            integration_links: row.integration_links.0,
            usage: KeyUsage {
                last_used: row.last_used,
                times_used: row.times_used,
                last_host: row.last_host,
            },
        }
    }
}
