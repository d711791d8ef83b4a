//! Access logging for the gateway

use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, HeaderMap, HeaderName, Method, Request},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};

use super::conditional::X_CACHE;
use super::problem::REQUEST_ID_HEADER;

/// What gets logged about an inbound request.
///
/// Credentials are never captured; only whether one was presented.
#[derive(Debug)]
struct RequestSummary {
    method: Method,
    route: String,
    uri: String,
    request_id: String,
    accept: String,
    if_none_match: String,
    if_match: String,
    credentialed: bool,
}

impl RequestSummary {
    fn from_request(request: &Request<Body>) -> Self {
        let headers = request.headers();
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|mp| mp.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        Self {
            method: request.method().clone(),
            route,
            uri: request.uri().to_string(),
            request_id: header_or_dash(headers, &HeaderName::from_static(REQUEST_ID_HEADER)),
            accept: header_or_dash(headers, &header::ACCEPT),
            if_none_match: header_or_dash(headers, &header::IF_NONE_MATCH),
            if_match: header_or_dash(headers, &header::IF_MATCH),
            credentialed: headers.contains_key(header::AUTHORIZATION)
                || headers.contains_key("x-api-key"),
        }
    }
}

fn header_or_dash(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Logs each request and its outcome, including the gate's cache status.
///
/// Runs inside the `TraceLayer` span and opens no span of its own.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let summary = RequestSummary::from_request(&request);

    info!(
        method = %summary.method,
        route = %summary.route,
        uri = %summary.uri,
        request_id = %summary.request_id,
        accept = %summary.accept,
        if_none_match = %summary.if_none_match,
        if_match = %summary.if_match,
        credentialed = summary.credentialed,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    let cache = header_or_dash(response.headers(), &X_CACHE);
    let duration_ms = start.elapsed().as_millis() as u64;

    if status.is_server_error() {
        warn!(
            method = %summary.method,
            route = %summary.route,
            status = status.as_u16(),
            cache = %cache,
            duration_ms,
            request_id = %summary.request_id,
            "Request failed"
        );
    } else {
        info!(
            method = %summary.method,
            route = %summary.route,
            status = status.as_u16(),
            cache = %cache,
            duration_ms,
            request_id = %summary.request_id,
            "Request completed"
        );
    }

    response
}
