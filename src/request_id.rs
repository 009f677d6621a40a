//! Request ID middleware.
//!
//! Every inbound request is assigned a unique `X-Request-ID`: accepted from
//! the caller if already present, freshly generated (UUID v4) otherwise.
//! Stored as an axum [`Extension`] so handlers can read it, wrapped in a
//! [`tracing`] span so every log line for the request includes it, and
//! echoed back in the response header.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Apply this middleware **inside** `tower_http::TraceLayer` so the request
/// ID is established before the trace span begins.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::debug_span!("request_id", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", header_value);
    }

    response
}
