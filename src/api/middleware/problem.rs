//! Attaches request context to problem responses

use axum::{
    body::Body,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::api::types::ProblemDetails;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fills `instance` and `correlationId` on problem responses produced by
/// inner layers and handlers
pub async fn problem_context_middleware(request: Request<Body>, next: Next) -> Response {
    let instance = request.uri().path().to_string();
    let correlation_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    let Some(problem) = response.extensions().get::<ProblemDetails>() else {
        return response;
    };

    let mut problem = problem.clone();
    problem.instance.get_or_insert(instance);
    if problem.correlation_id.is_none() {
        problem.correlation_id = correlation_id;
    }

    let Ok(body) = serde_json::to_vec(&problem) else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.extensions.insert(problem);

    Response::from_parts(parts, Body::from(body))
}
