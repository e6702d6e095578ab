//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};

use crate::{app::AppState, error::AppError, models::status::StatusEnvelope};

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// { "status": { "message": "OK", "code": 200 }, "pending": 3 }
/// ```
///
/// If the queue store is unreachable, returns the standard 500 envelope.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<StatusEnvelope>, AppError> {
    let pending = state.queue.pending_count().await?;

    Ok(Json(StatusEnvelope::ok("OK").with_pending(pending)))
}

/// Fallback for unmatched routes.
pub async fn not_found() -> AppError {
    AppError::NotFound
}
