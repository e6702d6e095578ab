//! Shared helpers for integration tests.
//!
//! Builds the real router over in-memory stores and provides request and
//! response shortcuts.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, StatusCode, header::CONTENT_TYPE},
};
use gumjabi::{
    app::{self, AppState},
    models::api_key::ApiKeyRecord,
    services::ingest_service::NameDefaults,
    store::memory::{MemoryKeyStore, MemoryWorkQueue},
};
use serde_json::Value;

pub const API_KEY: &str = "test-key-0123456789";
pub const PERMALINK: &str = "intro-course";
pub const INTEGRATION_ID: &str = "offer-42";
pub const ALLOWED_HOST: &str = "10.0.0.1";

/// Router plus handles on its stores.
pub struct TestApp {
    pub router: Router,
    pub keys: MemoryKeyStore,
    pub queue: MemoryWorkQueue,
}

impl TestApp {
    /// App with one enabled key entitled to `PERMALINK` from `ALLOWED_HOST`.
    pub async fn new(restrict_hosts: bool) -> Self {
        let keys = MemoryKeyStore::new();
        keys.insert(
            ApiKeyRecord::new(API_KEY)
                .with_link(PERMALINK, INTEGRATION_ID)
                .with_host(ALLOWED_HOST),
        )
        .await;
        let queue = MemoryWorkQueue::new();

        let state = AppState::new(
            Arc::new(keys.clone()),
            Arc::new(queue.clone()),
            restrict_hosts,
            NameDefaults {
                first_name: "Friendly".to_string(),
                last_name: "Human".to_string(),
            },
        );

        Self {
            router: app::router(state),
            keys,
            queue,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("request execution")
    }

    pub async fn times_used(&self) -> i64 {
        self.keys
            .get(API_KEY)
            .await
            .expect("test key exists")
            .usage
            .times_used
    }
}

/// Form-encoded POST.
pub fn form_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request build")
}

/// Attach a caller address the way `into_make_service_with_connect_info` does.
pub fn from_peer(mut request: Request<Body>, ip: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{ip}:40000").parse().expect("socket address");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

/// Ingest URI with the test key.
pub fn ingest_uri() -> String {
    format!("/gumroad/ping?key={API_KEY}")
}

/// A complete, valid notification body.
pub fn valid_form() -> String {
    format!("email=ada%40example.com&First+Name=Ada&permalink={PERMALINK}&price=2900")
}

/// Status code and parsed JSON body.
pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body extraction");
    let json = serde_json::from_slice(&body).expect("json deserialization");
    (status, json)
}

/// Assert the standard envelope.
pub fn assert_envelope(body: &Value, message: &str, code: u16) {
    assert_eq!(body["status"]["message"], message, "body: {body}");
    assert_eq!(body["status"]["code"], code, "body: {body}");
}
