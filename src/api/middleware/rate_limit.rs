//! Per-identity rate limiting middleware

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::rate_limit::ceil_seconds;
use crate::domain::{EndpointClass, RateLimitDecision};

use super::identity::resolve_identity;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const RATE_LIMIT_BACKOFF: HeaderName = HeaderName::from_static("x-ratelimit-backoff");

/// Counts the request against its `(class, identity)` window.
///
/// Also attaches the resolved `ClientIdentity` to the request so later layers
/// (personalized cache keys) see the same caller.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let identity = resolve_identity(&request, &state.identity);
    request.extensions_mut().insert(identity.clone());

    if !state.rate_limit_enabled {
        return next.run(request).await;
    }

    let class = EndpointClass::for_path(request.uri().path());
    let decision = state.rate_limiter.check(class, &identity).await;
    let window = state.rate_limiter.config().rule(class).window;

    if !decision.allowed {
        let retry_after = decision
            .retry_after
            .map(ceil_seconds)
            .unwrap_or_else(|| decision.reset_seconds())
            .max(1);

        let mut response = ApiError::rate_limited(
            format!(
                "Rate limit of {} requests per {}s exceeded for {} endpoints",
                decision.limit,
                ceil_seconds(window),
                class
            ),
            retry_after,
        )
        .into_response();

        let headers = response.headers_mut();
        apply_rate_limit_headers(headers, &decision);
        headers.insert(
            RATE_LIMIT_BACKOFF,
            header_value(format!(
                "exponential; initial={}; max={}",
                retry_after,
                ceil_seconds(window).max(retry_after)
            )),
        );

        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_seconds()));
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
