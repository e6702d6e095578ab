//! Purchase notification ingestion.
//!
//! Turns a form-encoded purchase notification into a `WorkItem` and appends
//! it to the queue. The caller's key has already been verified by the auth
//! gate; this service checks the key's entitlement to the product.
//!
//! # Validation Order
//!
//! 1. `permalink` missing or empty: `MissingParameter`
//! 2. `permalink` not among the key's integration links: `UnknownLink`
//! 3. `email` missing or empty: `MissingParameter`
//! 4. Missing names are replaced with the configured defaults
//! 5. `test=true` returns without touching the queue

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{AuthContext, redact_key},
    models::work_item::WorkItem,
    store::WorkQueue,
};

/// Names substituted when a notification omits them.
#[derive(Debug, Clone)]
pub struct NameDefaults {
    pub first_name: String,
    pub last_name: String,
}

/// Result of a successfully handled notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// `test=true`: validated, nothing queued
    TestAcknowledged,
    /// Appended under this queue id
    Queued(Uuid),
}

/// Fields pulled out of the form; everything else stays in `rest`.
#[derive(Debug, Default)]
struct Notification {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    test: Option<String>,
    permalink: Option<String>,
    rest: BTreeMap<String, String>,
}

impl Notification {
    /// Split form pairs into known fields and the rest. The last occurrence
    /// of a repeated field wins.
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut notification = Self::default();

        for (name, value) in pairs {
            let slot = match name.as_str() {
                "email" => &mut notification.email,
                "First Name" | "first_name" => &mut notification.first_name,
                "Last Name" | "last_name" => &mut notification.last_name,
                "test" => &mut notification.test,
                "permalink" => &mut notification.permalink,
                _ => {
                    notification.rest.insert(name, value);
                    continue;
                }
            };
            *slot = Some(value);
        }

        notification
    }
}

/// Validates notifications and appends work items.
pub struct IngestService {
    queue: Arc<dyn WorkQueue>,
    defaults: NameDefaults,
}

impl IngestService {
    pub fn new(queue: Arc<dyn WorkQueue>, defaults: NameDefaults) -> Self {
        Self { queue, defaults }
    }

    /// Validate a notification from the authenticated key and queue it.
    ///
    /// # Errors
    ///
    /// - `MissingParameter` when `permalink` or `email` is absent
    /// - `UnknownLink` when the key is not entitled to the permalink
    /// - `Store` when the append fails
    pub async fn ingest(
        &self,
        auth: &AuthContext,
        pairs: Vec<(String, String)>,
    ) -> Result<IngestOutcome, AppError> {
        let Notification {
            email,
            first_name,
            last_name,
            test,
            permalink,
            rest,
        } = Notification::from_pairs(pairs);

        // None and empty are both bad
        let Some(permalink) = permalink.filter(|p| !p.is_empty()) else {
            log_param_error("a permalink", &rest);
            return Err(AppError::MissingParameter("permalink"));
        };

        let Some(integration_id) = auth.key.integration_for(&permalink) else {
            tracing::error!(
                permalink = %permalink,
                key = %redact_key(auth.key_id()),
                "Could not find integration link"
            );
            return Err(AppError::UnknownLink(permalink));
        };

        let Some(email) = email.filter(|e| !e.is_empty()) else {
            log_param_error("an email", &rest);
            return Err(AppError::MissingParameter("email"));
        };

        let first_name = first_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.defaults.first_name.clone());
        let last_name = last_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.defaults.last_name.clone());

        if test.as_deref() == Some("true") {
            tracing::debug!("Test request successful");
            return Ok(IngestOutcome::TestAcknowledged);
        }

        tracing::debug!(
            email = %email,
            permalink = %permalink,
            "Queueing account creation"
        );

        let item = WorkItem {
            key_id: auth.key_id().to_string(),
            email,
            first_name,
            last_name,
            integration_id: integration_id.to_string(),
            external_link: permalink,
            requested_at: Utc::now(),
            extra: rest,
        };

        let id = self.queue.append(&item).await?;
        tracing::info!(item_id = %id, "Work item queued");

        Ok(IngestOutcome::Queued(id))
    }
}

/// Log a missing parameter together with everything the sender did provide.
fn log_param_error(param: &str, rest: &BTreeMap<String, String>) {
    let form = serde_json::to_string(rest).unwrap_or_else(|e| format!("<unserializable: {e}>"));
    tracing::error!(form = %form, "Notification did not provide {param}");
}
