//! Error types and HTTP error response handling.
//!
//! Every request failure is rendered into the same envelope used for
//! successful responses, so callers always receive a well-formed JSON status
//! object. Internal detail (store errors, payload dumps, hosts) is logged
//! server-side and never returned.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{models::status::StatusEnvelope, store::StoreError};

/// Application-wide error type for the HTTP boundary.
///
/// # Error Categories
///
/// - **Credential Errors**: Missing, unknown, disabled or host-restricted keys
/// - **Validation Errors**: Missing parameters or unknown permalinks
/// - **Store Errors**: Any failure from the key store or work queue
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No `key` query parameter was supplied.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("You must specify an API key")]
    MissingCredential,

    /// Key is unknown, disabled, or not allowed from the caller's host.
    ///
    /// All three reasons share one message so callers cannot tell them apart.
    /// Returns HTTP 403 Forbidden.
    #[error("Invalid API key")]
    InvalidCredential,

    /// A required form field is absent or empty.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Parameter missing: {0}")]
    MissingParameter(&'static str),

    /// The permalink is not one of the key's integration links.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid permalink: {0}")]
    UnknownLink(String),

    /// No route matched.
    #[error("Not found")]
    NotFound,

    /// Key store or work queue failure.
    ///
    /// Returns HTTP 500 and hides the detail from the caller.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A handler panicked.
    #[error("An internal error occurred")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingCredential | AppError::InvalidCredential => StatusCode::FORBIDDEN,
            AppError::MissingParameter(_) | AppError::UnknownLink(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller.
    fn public_message(&self) -> String {
        match self {
            AppError::Store(_) => AppError::Internal.to_string(),
            other => other.to_string(),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// { "status": { "message": "Invalid API key", "code": 403 } }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::Store(ref e) = self {
            tracing::error!(error = %e, "Request failed on store access");
        }

        let body = Json(StatusEnvelope::new(self.public_message(), status.as_u16()));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_are_forbidden() {
        assert_eq!(AppError::MissingCredential.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::InvalidCredential.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn store_errors_hide_detail() {
        let error = AppError::Store(StoreError::Unavailable("10.1.2.3 refused".to_string()));

        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.public_message(), "An internal error occurred");
    }

    #[test]
    fn validation_messages_name_the_field() {
        assert_eq!(
            AppError::MissingParameter("email").to_string(),
            "Parameter missing: email"
        );
        assert_eq!(
            AppError::UnknownLink("abc".to_string()).to_string(),
            "Invalid permalink: abc"
        );
    }
}
