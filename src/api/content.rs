//! Generic upstream passthrough for content routes

use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::{UpstreamRequest, UpstreamResponse};
use crate::infrastructure::services::CacheTags;

/// Request headers worth passing to the upstream.
///
/// Any of these that can change a GET body is also a cache key dimension.
const FORWARDED_HEADERS: [header::HeaderName; 3] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::CONTENT_TYPE,
];

/// Routes nested under `/api`
pub fn create_content_router() -> Router<AppState> {
    Router::new().route("/{*path}", any(forward))
}

/// Forwards the request to the upstream through its circuit breaker
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path_and_query = match &query {
        Some(q) => format!("/{}?{}", path, q),
        None => format!("/{}", path),
    };

    let mut request = UpstreamRequest::get(path_and_query).with_body(body);
    request.method = method.as_str().to_string();

    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) {
            request = request.with_header(name.as_str(), value);
        }
    }

    let upstream = state.upstream.clone();
    let name = upstream.name().to_string();

    let response = state
        .breakers
        .execute(&name, || async move { upstream.send(request).await })
        .await?;

    debug!(upstream = %name, path = %path, status = response.status, "Upstream responded");

    let mut response = into_response(response)?;

    if method == Method::GET {
        if let Some(section) = path.split('/').find(|s| !s.is_empty()) {
            response
                .extensions_mut()
                .insert(CacheTags::new([format!("section:{}", section)]));
        }
    }

    Ok(response)
}

fn into_response(upstream: UpstreamResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(upstream.status)
        .map_err(|_| ApiError::internal(format!("Invalid upstream status {}", upstream.status)))?;

    let mut response = (status, Body::from(upstream.body)).into_response();

    if let Some(content_type) = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }

    Ok(response)
}
