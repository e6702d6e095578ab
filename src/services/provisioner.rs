//! Downstream account provisioning.
//!
//! The worker hands each claimed item to a [`Provisioner`]. The production
//! implementation forwards the item to the provisioning service over HTTP
//! with an HMAC signature, and classifies failures as retryable or not.

use std::{future::Future, pin::Pin, time::Duration};

use hmac::{Hmac, Mac};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use sha2::Sha256;

use crate::models::work_item::ClaimedItem;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of the body>`.
pub const SIGNATURE_HEADER: &str = "X-Gumjabi-Signature";

/// Header carrying the queue id, stable across retries of the same item.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Response bodies longer than this are cut before logging.
const MAX_ERROR_BODY: usize = 512;

/// Boxed future returned by [`Provisioner::provision`].
pub type ProvisionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + 'a>>;

/// Provisioning failures.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Worth retrying later (timeouts, throttling, server errors).
    #[error("Transient provisioning failure: {0}")]
    Transient(String),

    /// The downstream rejected the item; retrying cannot help.
    #[error("Permanent provisioning failure: {0}")]
    Permanent(String),

    /// Downstream URL failed validation.
    #[error("Invalid provisioning URL: {0}")]
    InvalidUrl(String),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl ProvisionError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProvisionError::Permanent(_))
    }
}

/// Creates the downstream account for one work item.
///
/// Implementations must be idempotent per `ClaimedItem::id`: the same item
/// can be delivered again if a worker dies before settling it.
pub trait Provisioner: Send + Sync + 'static {
    fn provision<'a>(&'a self, claimed: &'a ClaimedItem) -> ProvisionFuture<'a>;
}

/// Forwards work items to the provisioning service.
///
/// # Request
///
/// `POST <provision_url>` with the `WorkItem` as JSON and headers:
/// - `Content-Type: application/json`
/// - `X-Gumjabi-Signature: sha256=<hex>`
/// - `X-Idempotency-Key: <queue id>`
pub struct HttpProvisioner {
    client: reqwest::Client,
    url: url::Url,
    secret: String,
}

impl HttpProvisioner {
    /// Build a provisioner for `url`.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` if the URL is malformed or uses plain HTTP off localhost
    /// - `Client` if the HTTP client cannot be constructed
    pub fn new(url: &str, secret: impl Into<String>, timeout: Duration) -> Result<Self, ProvisionError> {
        let url = validate_provision_url(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            secret: secret.into(),
        })
    }

    async fn send(&self, claimed: &ClaimedItem) -> Result<(), ProvisionError> {
        let body = serde_json::to_vec(&claimed.item)
            .map_err(|e| ProvisionError::Permanent(format!("Failed to serialize work item: {e}")))?;
        let signature = generate_signature(&self.secret, &body)?;

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(IDEMPOTENCY_HEADER, claimed.id.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| ProvisionError::Transient(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut detail = response.text().await.unwrap_or_default();
        if detail.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !detail.is_char_boundary(cut) {
                cut -= 1;
            }
            detail.truncate(cut);
        }
        let message = format!("{status}: {detail}");

        if is_retryable(status) {
            Err(ProvisionError::Transient(message))
        } else {
            Err(ProvisionError::Permanent(message))
        }
    }
}

impl Provisioner for HttpProvisioner {
    fn provision<'a>(&'a self, claimed: &'a ClaimedItem) -> ProvisionFuture<'a> {
        Box::pin(self.send(claimed))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Generate the HMAC-SHA256 signature for a request body.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
pub fn generate_signature(secret: &str, payload: &[u8]) -> Result<String, ProvisionError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProvisionError::Permanent(format!("Invalid signing secret: {e}")))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Validate the provisioning URL.
///
/// # Rules
///
/// - Must be a valid URL
/// - Must be HTTPS (HTTP allowed for localhost)
fn validate_provision_url(raw: &str) -> Result<url::Url, ProvisionError> {
    let parsed = url::Url::parse(raw)
        .map_err(|_| ProvisionError::InvalidUrl("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" => match parsed.host_str() {
            Some("localhost" | "127.0.0.1" | "[::1]") => Ok(parsed),
            _ => Err(ProvisionError::InvalidUrl(
                "HTTP is only allowed for localhost. Use HTTPS for production.".to_string(),
            )),
        },
        _ => Err(ProvisionError::InvalidUrl(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}
