//! RFC 7807 problem detail responses

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::rate_limit::ceil_seconds;
use crate::domain::DomainError;

/// Media type of problem responses
pub const PROBLEM_JSON: &str = "application/problem+json";

const PROBLEM_TYPE_BASE: &str = "https://content-gateway.dev/problems";

/// Problem categories exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadRequest,
    Unauthorized,
    NotFound,
    PreconditionFailed,
    RateLimited,
    CircuitOpen,
    UpstreamUnavailable,
    StoreUnavailable,
    Internal,
}

impl ProblemKind {
    pub fn slug(self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not-found",
            Self::PreconditionFailed => "precondition-failed",
            Self::RateLimited => "rate-limited",
            Self::CircuitOpen => "circuit-open",
            Self::UpstreamUnavailable => "upstream-unavailable",
            Self::StoreUnavailable => "store-unavailable",
            Self::Internal => "internal-error",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "Not Found",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RateLimited => "Too Many Requests",
            Self::CircuitOpen => "Upstream Circuit Open",
            Self::UpstreamUnavailable => "Upstream Unavailable",
            Self::StoreUnavailable => "Cache Store Unavailable",
            Self::Internal => "Internal Server Error",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen | Self::UpstreamUnavailable | Self::StoreUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn type_uri(self) -> String {
        format!("{}/{}", PROBLEM_TYPE_BASE, self.slug())
    }
}

/// Problem detail body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// API error rendered as `application/problem+json`
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ProblemKind,
    pub problem: ProblemDetails,
}

impl ApiError {
    pub fn new(kind: ProblemKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            problem: ProblemDetails {
                problem_type: kind.type_uri(),
                title: kind.title().to_string(),
                status: kind.status().as_u16(),
                detail: detail.into(),
                instance: None,
                retry_after: None,
                correlation_id: None,
            },
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.problem.retry_after = Some(seconds);
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.problem.instance = Some(instance.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.problem.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::BadRequest, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Unauthorized, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::NotFound, detail)
    }

    pub fn precondition_failed(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::PreconditionFailed, detail)
    }

    pub fn rate_limited(detail: impl Into<String>, retry_after: u64) -> Self {
        Self::new(ProblemKind::RateLimited, detail).with_retry_after(retry_after)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ProblemKind::Internal, detail)
    }
}

/// Renders the problem body and headers; the problem itself travels along
/// as a response extension so request context can be attached later
pub fn problem_response(status: StatusCode, problem: &ProblemDetails) -> Response {
    let body = serde_json::to_vec(problem).unwrap_or_default();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));

    if let Some(retry_after) = problem.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }

    if status == StatusCode::UNAUTHORIZED {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }

    response.extensions_mut().insert(problem.clone());
    response
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        problem_response(self.status(), &self.problem)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::NotFound { message } => Self::not_found(message),
            DomainError::Validation { message } => Self::bad_request(message),
            DomainError::PreconditionFailed { message } => Self::precondition_failed(message),
            DomainError::Unauthorized { message } => Self::unauthorized(message),
            DomainError::RateLimited { retry_after, .. } => {
                Self::rate_limited(err.to_string(), ceil_seconds(*retry_after))
            }
            DomainError::CircuitOpen { retry_after, .. } => {
                Self::new(ProblemKind::CircuitOpen, err.to_string())
                    .with_retry_after(ceil_seconds(*retry_after).max(1))
            }
            DomainError::Upstream { upstream, .. } => {
                error!(upstream = %upstream, error = %err, "Upstream failure surfaced to client");
                Self::new(
                    ProblemKind::UpstreamUnavailable,
                    format!("Upstream '{}' is unavailable", upstream),
                )
            }
            DomainError::StoreUnavailable { .. } => {
                error!(error = %err, "Cache store failure surfaced to client");
                Self::new(ProblemKind::StoreUnavailable, "Cache store is unavailable")
            }
            DomainError::Configuration { .. } | DomainError::Internal { .. } => {
                error!(error = %err, "Internal error");
                Self::internal("An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn body_of(response: Response) -> ProblemDetails {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_circuit_open_is_distinct_from_upstream_unavailable() {
        let open: ApiError =
            DomainError::circuit_open("content-api", Duration::from_millis(2500)).into();
        let down: ApiError = DomainError::upstream("content-api", "HTTP 502").into();

        assert_eq!(open.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_ne!(open.problem.problem_type, down.problem.problem_type);
        assert!(open.problem.problem_type.ends_with("/circuit-open"));
        assert!(down.problem.problem_type.ends_with("/upstream-unavailable"));

        let response = open.into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
        assert_eq!(body_of(response).await.retry_after, Some(3));
    }

    #[tokio::test]
    async fn test_rate_limited_body_uses_camel_case() {
        let response = ApiError::rate_limited("slow down", 7)
            .with_correlation_id("req-1")
            .with_instance("/api/search")
            .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["retryAfter"], 7);
        assert_eq!(json["correlationId"], "req-1");
        assert_eq!(json["instance"], "/api/search");
        assert_eq!(json["status"], 429);
        assert_eq!(json["title"], "Too Many Requests");
    }

    #[test]
    fn test_domain_error_mapping() {
        let cases = [
            (DomainError::not_found("x"), StatusCode::NOT_FOUND),
            (DomainError::validation("x"), StatusCode::BAD_REQUEST),
            (DomainError::precondition_failed("x"), StatusCode::PRECONDITION_FAILED),
            (DomainError::unauthorized("x"), StatusCode::UNAUTHORIZED),
            (DomainError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (DomainError::store_unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err: ApiError = DomainError::configuration("redis password is hunter2").into();
        assert!(!err.problem.detail.contains("hunter2"));
    }

    #[test]
    fn test_unauthorized_challenges_bearer() {
        let response = ApiError::unauthorized("missing key").into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert!(response.extensions().get::<ProblemDetails>().is_some());
    }
}
