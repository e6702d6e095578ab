//! API key authentication gate.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the `key` query parameter
//! 2. Look the key up and reject unknown or disabled keys
//! 3. Enforce the key's host list when host restriction is enabled
//! 4. Inject the verified key into the request for the handler
//! 5. Record usage after the handler finishes, whatever its outcome
//!
//! Authorization is strict; usage accounting is best-effort. Accounting
//! failures are logged and never change the response the caller sees.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::{error::AppError, models::api_key::ApiKeyRecord, store::KeyStore};

/// Name of the query parameter carrying the API key.
pub const KEY_PARAM: &str = "key";

/// Authentication context attached to authenticated requests.
///
/// Inserted into the request's extension map; handlers extract it with
/// `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The verified key record, as read during authorization
    pub key: Arc<ApiKeyRecord>,

    /// Caller address, when the server knows it
    pub host: Option<String>,
}

impl AuthContext {
    pub fn key_id(&self) -> &str {
        &self.key.id
    }
}

/// Resolves and accounts API keys.
///
/// Built once at startup with its key store and the deployment-wide host
/// restriction flag.
pub struct AuthGate {
    keys: Arc<dyn KeyStore>,
    restrict_hosts: bool,
}

impl AuthGate {
    pub fn new(keys: Arc<dyn KeyStore>, restrict_hosts: bool) -> Self {
        Self {
            keys,
            restrict_hosts,
        }
    }

    /// Decide whether a request carrying `key` from `host` may proceed.
    ///
    /// # Errors
    ///
    /// - `MissingCredential` if no key was supplied
    /// - `InvalidCredential` if the key is unknown, disabled, or (with host
    ///   restriction on) not allowed from `host`
    /// - `Store` if the key store cannot be read
    pub async fn authorize(
        &self,
        key: Option<&str>,
        host: Option<&str>,
    ) -> Result<AuthContext, AppError> {
        let key = key.ok_or(AppError::MissingCredential)?;

        let record = self
            .keys
            .find_by_id(key)
            .await?
            .ok_or(AppError::InvalidCredential)?;

        if record.disabled || record.id != key {
            tracing::debug!(disabled = record.disabled, "Rejected API key");
            return Err(AppError::InvalidCredential);
        }

        if self.restrict_hosts && !record.allows_host(host) {
            tracing::error!(
                host = host.unwrap_or("unknown"),
                "Could not find host for the specified API key"
            );
            return Err(AppError::InvalidCredential);
        }

        Ok(AuthContext {
            key: Arc::new(record),
            host: host.map(str::to_string),
        })
    }

    /// Increment the key's usage counter and move `last_used` to now.
    ///
    /// Never fails: errors are logged with the host and swallowed.
    pub async fn record_usage(&self, auth: &AuthContext) {
        let host = auth.host.as_deref();
        if let Err(e) = self.keys.record_usage(auth.key_id(), host, Utc::now()).await {
            tracing::error!(
                host = host.unwrap_or("unknown"),
                error = %e,
                "Could not update key usage"
            );
        }
    }
}

/// Runs usage accounting exactly once for an authorized request.
///
/// The normal path calls [`UsageGuard::settle`] after the handler returns.
/// If the request future is dropped first (a handler panic unwinding through
/// the middleware, or the client going away) the accounting is spawned from
/// `Drop` instead.
struct UsageGuard {
    gate: Arc<AuthGate>,
    pending: Option<AuthContext>,
}

impl UsageGuard {
    fn new(gate: Arc<AuthGate>, auth: AuthContext) -> Self {
        Self {
            gate,
            pending: Some(auth),
        }
    }

    async fn settle(mut self) {
        if let Some(auth) = self.pending.take() {
            self.gate.record_usage(&auth).await;
        }
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        let Some(auth) = self.pending.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gate = self.gate.clone();
                handle.spawn(async move { gate.record_usage(&auth).await });
            }
            Err(_) => tracing::error!(
                key = %redact_key(auth.key_id()),
                "Dropped key usage update outside of a runtime"
            ),
        }
    }
}

/// Extract the `key` query parameter. When it is repeated the last value
/// wins, and an empty last value counts as missing.
pub fn extract_api_key(uri: &Uri) -> Option<String> {
    let query = uri.query()?;

    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| name == KEY_PARAM)
        .last()
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Caller address from the connection, when served with connect info.
fn caller_host(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Last five characters of a key, safe to log.
pub fn redact_key(key: &str) -> String {
    let skip = key.chars().count().saturating_sub(5);
    key.chars().skip(skip).collect()
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Read `?key=<api_key>` from the request URI
/// 2. Authorize it through the [`AuthGate`]
/// 3. If accepted: inject `AuthContext`, run the handler, record usage
/// 4. If rejected: return 403 (or 500 on store failure) without running the handler
pub async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = extract_api_key(request.uri());
    let host = caller_host(&request);

    let auth = gate.authorize(key.as_deref(), host.as_deref()).await?;

    request.extensions_mut().insert(auth.clone());
    let guard = UsageGuard::new(gate.clone(), auth);

    let response = next.run(request).await;

    guard.settle().await;

    Ok(response)
}
