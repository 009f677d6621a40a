//! Proxy Engine — the per-request pipeline: match a route, enforce its rate
//! limit, stream the request to the downstream service, and stream the
//! response back.
//!
//! Installed as the axum router's `fallback` handler, giving it the lowest
//! routing precedence so the explicit admin/dashboard/health routes always
//! win first.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri},
    response::Response,
};
use futures_util::TryStreamExt as _;
use serde_json::json;

use crate::access_log::AccessLogEvent;
use crate::AppState;

/// Header names stripped in both directions before relaying a message —
/// connection-scoped transport details that must not survive a hop.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "te",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
    "keep-alive",
    "trailer",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// First comma-separated entry of `X-Forwarded-For` if present and
/// non-blank, else the transport peer address.
pub fn extract_client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| peer.ip())
}

fn error_body(message: impl Into<String>) -> Body {
    Body::from(json!({ "error": message.into() }).to_string())
}

fn json_response(status: StatusCode, message: impl Into<String>) -> Response {
    let mut response = Response::new(error_body(message));
    *response.status_mut() = status;
    response.headers_mut().insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// The axum `fallback` handler: every request that doesn't match an
/// explicit route (admin, dashboard, health) arrives here.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let headers = request.headers().clone();
    let client_ip = extract_client_ip(&headers, peer);

    let Some(route) = state.cache.find_match(&path).await else {
        let response = json_response(StatusCode::NOT_FOUND, format!("No route found for path: {path}"));
        state.access_log.publish(build_event(client_ip, &method, &path, None, response.status(), start, false));
        return response;
    };

    let decision = state.rate_limiter.check(client_ip, &route).await;
    if !decision.allowed {
        let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        set_rate_limit_headers(&mut response, route.capacity, 0);
        response.headers_mut().insert(axum::http::header::RETRY_AFTER, HeaderValue::from_static("1"));
        state.access_log.publish(build_event(client_ip, &method, &path, Some(route.target_url.clone()), response.status(), start, true));
        return response;
    }

    let mut response =
        dispatch(&state.http_client, &method, &uri, &route.target_url, &path, headers, request.into_body()).await;

    if let Some(capacity) = route.capacity {
        set_rate_limit_headers(&mut response, Some(capacity), decision.remaining);
    }

    state.access_log.publish(build_event(client_ip, &method, &path, Some(route.target_url.clone()), response.status(), start, false));
    response
}

fn set_rate_limit_headers(response: &mut Response, capacity: Option<i64>, remaining: i64) {
    if let Some(capacity) = capacity {
        if let Ok(limit) = HeaderValue::from_str(&capacity.to_string()) {
            response.headers_mut().insert(HeaderName::from_static("x-ratelimit-limit"), limit);
        }
        if let Ok(remaining) = HeaderValue::from_str(&remaining.to_string()) {
            response.headers_mut().insert(HeaderName::from_static("x-ratelimit-remaining"), remaining);
        }
    }
}

fn build_event(
    client_ip: IpAddr,
    method: &Method,
    path: &str,
    target_url: Option<String>,
    status: StatusCode,
    start: Instant,
    rate_limited: bool,
) -> AccessLogEvent {
    AccessLogEvent {
        timestamp: chrono::Utc::now(),
        client_ip,
        method: method.to_string(),
        path: path.to_string(),
        target_url,
        status_code: status.as_u16(),
        latency_ms: start.elapsed().as_millis() as u64,
        rate_limited,
    }
}

/// Build the outbound request, dispatch it via the shared client, and relay
/// the response — streamed in both directions, never buffered in full.
async fn dispatch(
    http_client: &reqwest::Client,
    method: &Method,
    uri: &Uri,
    target_base: &str,
    path: &str,
    inbound_headers: HeaderMap,
    body: Body,
) -> Response {
    let target_url = match uri.query() {
        Some(q) => format!("{target_base}{path}?{q}"),
        None => format!("{target_base}{path}"),
    };

    let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(err) => return json_response(StatusCode::BAD_GATEWAY, format!("Bad gateway: {err}")),
    };

    let mut outbound_headers = reqwest::header::HeaderMap::new();
    for (name, value) in inbound_headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        if let Ok(value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) {
            outbound_headers.append(name.clone(), value);
        }
    }

    // The inbound body is forwarded as a stream rather than buffered. If the
    // caller's connection drops mid-upload, `into_data_stream` yields an
    // `Err` for the inbound side; `interrupted` records that so a resulting
    // send failure can be told apart from an ordinary downstream error.
    let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let interrupted_writer = interrupted.clone();
    let body_stream = body.into_data_stream().map_err(move |err| {
        interrupted_writer.store(true, std::sync::atomic::Ordering::Relaxed);
        std::io::Error::other(err)
    });
    let outbound_body = reqwest::Body::wrap_stream(body_stream);

    let result = http_client
        .request(reqwest_method, &target_url)
        .headers(outbound_headers)
        .body(outbound_body)
        .send()
        .await;

    let downstream = match result {
        Ok(response) => response,
        Err(err) if interrupted.load(std::sync::atomic::Ordering::Relaxed) => {
            tracing::warn!(error = %err, target = %target_url, "inbound connection dropped mid-dispatch");
            return json_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy request interrupted");
        }
        Err(err) => {
            tracing::error!(error = %err, target = %target_url, "dispatch failed");
            return json_response(StatusCode::BAD_GATEWAY, format!("Bad gateway: {err}"));
        }
    };

    relay(downstream)
}

/// Copy status and headers from the downstream response, stream the body
/// through without buffering it in full.
fn relay(downstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(downstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_headers = HeaderMap::new();
    for (name, value) in downstream.headers().iter() {
        if is_hop_by_hop(name) || name.as_str().starts_with(':') {
            continue;
        }
        if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
            response_headers.insert(name.clone(), value);
        }
    }

    let stream = downstream.bytes_stream().map_err(|err| {
        tracing::warn!(error = %err, "downstream stream interrupted");
        std::io::Error::other(err)
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
