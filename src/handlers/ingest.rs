//! Purchase notification webhook handler.
//!
//! - POST /gumroad/ping - Queue an account for provisioning
//! - POST /gunroad/ping/ - Legacy misspelled alias kept for existing integrations

use axum::{Extension, Json, body::Bytes, extract::State};

use crate::{
    app::AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::status::StatusEnvelope,
    services::ingest_service::IngestOutcome,
};

/// Accept a purchase notification.
///
/// # Authentication
///
/// Requires a valid API key in the `key` query parameter.
///
/// # Request Body
///
/// `application/x-www-form-urlencoded`:
///
/// ```text
/// email=ada%40example.com&First+Name=Ada&permalink=intro-course&price=2900
/// ```
///
/// # Response
///
/// - **Success (200)**: `{"status": {"message": "Success", "code": 200}}`
/// - **Test mode (200)**: `test=true` answers "Test successful" and queues nothing
/// - **Error (400)**: missing `permalink` or `email`, or an unknown permalink
/// - **Error (403)**: missing or invalid API key
/// - **Error (500)**: queue unavailable
pub async fn gumroad_ping(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> Result<Json<StatusEnvelope>, AppError> {
    let pairs = url::form_urlencoded::parse(&body).into_owned().collect();

    let message = match state.ingest.ingest(&auth, pairs).await? {
        IngestOutcome::TestAcknowledged => "Test successful",
        IngestOutcome::Queued(_) => "Success",
    };

    Ok(Json(StatusEnvelope::ok(message)))
}
