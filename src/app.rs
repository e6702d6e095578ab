//! Router assembly.
//!
//! Builds the ingestion router from its collaborators so the binary and the
//! integration tests serve exactly the same stack.

use std::{any::Any, sync::Arc};

use axum::{
    Router, middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    error::AppError,
    handlers,
    middleware::{self, auth::AuthGate},
    services::ingest_service::{IngestService, NameDefaults},
    store::{KeyStore, WorkQueue},
};

/// Primary ingestion path.
pub const INGEST_PATH: &str = "/gumroad/ping";

/// Misspelled alias, still used by integrations configured long ago.
pub const LEGACY_INGEST_PATH: &str = "/gunroad/ping/";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub ingest: Arc<IngestService>,
    pub queue: Arc<dyn WorkQueue>,
}

impl AppState {
    pub fn new(
        keys: Arc<dyn KeyStore>,
        queue: Arc<dyn WorkQueue>,
        restrict_hosts: bool,
        defaults: NameDefaults,
    ) -> Self {
        Self {
            gate: Arc::new(AuthGate::new(keys, restrict_hosts)),
            ingest: Arc::new(IngestService::new(queue.clone(), defaults)),
            queue,
        }
    }
}

/// Render a handler panic as the standard 500 envelope.
fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Handler panicked");
    AppError::Internal.into_response()
}

/// Build the ingestion router.
pub fn router(state: AppState) -> Router {
    // Routes behind the API key gate
    let authenticated_routes = Router::new()
        .route(INGEST_PATH, post(handlers::ingest::gumroad_ping))
        .route(LEGACY_INGEST_PATH, post(handlers::ingest::gumroad_ping))
        .route_layer(axum_middleware::from_fn_with_state(
            state.gate.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .fallback(handlers::health::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(middleware::trace::make_span)
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .with_state(state)
}
