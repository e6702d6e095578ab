//! Request tracing with API key redaction.
//!
//! `TraceLayer`'s default span records the full URI, which would write every
//! caller's API key to the logs. The span built here records the URI with the
//! `key` value trimmed to its last five characters.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Uri},
};
use tracing::Span;

use super::auth::{KEY_PARAM, redact_key};

/// Rewrite `uri` so only the tail of the `key` parameter remains.
///
/// Other parameters and their order are preserved.
pub fn redact_uri(uri: &Uri) -> String {
    let Some(query) = uri.query() else {
        return uri.path().to_string();
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if name == KEY_PARAM {
            serializer.append_pair(&name, &redact_key(&value));
        } else {
            serializer.append_pair(&name, &value);
        }
    }

    format!("{}?{}", uri.path(), serializer.finish())
}

/// Span for one request, used with `TraceLayer::make_span_with`.
pub fn make_span(request: &Request<Body>) -> Span {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %redact_uri(request.uri()),
        version = ?request.version(),
        remote_addr = %remote_addr,
    )
}
