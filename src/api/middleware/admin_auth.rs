//! Admin authentication extractor
//!
//! The admin key is accepted from either:
//! - `Authorization: Bearer <key>`
//! - `X-API-Key: <key>`

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use crate::api::state::{hash_admin_key, AppState};
use crate::api::types::ApiError;

/// Extractor that requires the configured admin key
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_key_hash.as_deref() else {
            warn!("Admin request rejected: no admin key configured");
            return Err(ApiError::unauthorized("Admin API is disabled"));
        };

        let presented = extract_key_from_headers(&parts.headers)?;

        if !constant_time_eq(hash_admin_key(&presented).as_bytes(), expected.as_bytes()) {
            debug!("Admin request rejected: key mismatch");
            return Err(ApiError::unauthorized("Invalid admin key"));
        }

        Ok(RequireAdmin)
    }
}

fn extract_key_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid Authorization header encoding"))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.trim().to_string());
        }
    }

    if let Some(api_key_header) = headers.get("x-api-key") {
        let key = api_key_header
            .to_str()
            .map_err(|_| ApiError::bad_request("Invalid X-API-Key header encoding"))?;

        return Ok(key.trim().to_string());
    }

    Err(ApiError::unauthorized(
        "Admin key required. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header",
    ))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request, StatusCode};

    use super::*;
    use crate::api::state::test_support::{idle_upstream, state_with, test_config, TEST_ADMIN_KEY};
    use crate::config::AppConfig;

    async fn extract(state: &AppState, headers: &[(&str, &str)]) -> Result<RequireAdmin, ApiError> {
        let mut builder = Request::builder().uri("/admin/circuit-breakers");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        RequireAdmin::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn test_bearer_and_api_key_headers_accepted() {
        let state = state_with(idle_upstream(), &test_config());
        let bearer = format!("Bearer {}", TEST_ADMIN_KEY);

        assert!(extract(&state, &[("authorization", &bearer)]).await.is_ok());
        assert!(extract(&state, &[("x-api-key", TEST_ADMIN_KEY)]).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_or_missing_key_is_unauthorized() {
        let state = state_with(idle_upstream(), &test_config());

        let wrong = extract(&state, &[("x-api-key", "nope")]).await.unwrap_err();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let missing = extract(&state, &[]).await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_configured_key_closes_admin() {
        let state = state_with(idle_upstream(), &AppConfig::default());
        let err = extract(&state, &[("x-api-key", TEST_ADMIN_KEY)]).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_rejects_non_ascii_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_bytes(&[0xFF]).unwrap());
        assert!(extract_key_from_headers(&headers).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
