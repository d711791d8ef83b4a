//! Conditional request gate: cache lookup, ETag validation and write
//! preconditions around the handlers

use std::future::Future;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::api::state::AppState;
use crate::api::types::ApiError;
use crate::domain::cache::{RequestVariant, NO_STORE_DIRECTIVE};
use crate::domain::{CacheEntry, ClientIdentity, DomainError, EtagCodec, Freshness, RoutePolicy};
use crate::infrastructure::observability::{record_cache_lookup, CacheOutcome};
use crate::infrastructure::services::{
    BufferedResponse, FlightRole, ForceRefresh, ResponseCacheService,
};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const HIT: &str = "HIT";
const MISS: &str = "MISS";

/// Per-request facts the gate needs after the request has been handed on
struct GateContext {
    key: String,
    path: String,
    policy: RoutePolicy,
    if_none_match: Option<String>,
}

impl GateContext {
    fn for_request(cache: &ResponseCacheService, request: &Request<Body>) -> Self {
        let path = request.uri().path().to_string();
        let policy = cache.policy_for(&path);

        let identity = policy
            .personalized
            .then(|| request.extensions().get::<ClientIdentity>())
            .flatten()
            .map(ToString::to_string);

        let headers = request.headers();
        let variant = RequestVariant {
            query: request.uri().query(),
            accept: header_str(headers, &header::ACCEPT),
            accept_language: header_str(headers, &header::ACCEPT_LANGUAGE),
            identity: identity.as_deref(),
        };
        let key = cache.key_for(&path, &variant);

        Self {
            key,
            path,
            policy,
            if_none_match: header_str(headers, &header::IF_NONE_MATCH).map(str::to_string),
        }
    }

    fn client_has(&self, entry: &CacheEntry) -> bool {
        self.if_none_match
            .as_deref()
            .is_some_and(|candidates| EtagCodec::matches(entry.etag(), candidates))
    }
}

/// Serves cached GET representations and guards writes with `If-Match`.
///
/// Reads go through the response cache with single-flight coalescing on a
/// miss. Writes with a stale `If-Match` get 412 before the handler runs, and
/// a successful write drops every cached variant of its path.
pub async fn conditional_request_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cache = &state.response_cache;

    match *request.method() {
        Method::GET => handle_read(cache, request, next).await,
        Method::HEAD | Method::OPTIONS => next.run(request).await,
        _ => handle_write(cache, request, next).await,
    }
}

async fn handle_read(cache: &ResponseCacheService, request: Request<Body>, next: Next) -> Response {
    let ctx = GateContext::for_request(cache, &request);

    if !ctx.policy.is_cacheable() {
        record_cache_lookup(ctx.policy.class, CacheOutcome::Bypass);
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(NO_STORE_DIRECTIVE),
        );
        return response;
    }

    let force_refresh = request.extensions().get::<ForceRefresh>().is_some();

    if !force_refresh {
        if let Some(entry) = cache.lookup(&ctx.key).await {
            match entry.freshness() {
                Freshness::Fresh => return serve_entry(&ctx, &entry, CacheOutcome::Hit),
                Freshness::Stale if ctx.policy.serve_stale => {
                    spawn_refresh(cache, &ctx, next, &request);
                    return serve_entry(&ctx, &entry, CacheOutcome::Stale);
                }
                _ => {}
            }
        }
    }

    record_cache_lookup(ctx.policy.class, CacheOutcome::Miss);

    let (result, role) = cache
        .coalesce(&ctx.key, fetch(cache.clone(), &ctx, next, request))
        .await;

    match result {
        Ok(buffered) => miss_response(&ctx, &buffered, role),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn handle_write(cache: &ResponseCacheService, request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();

    if let Some(if_match) = header_str(request.headers(), &header::IF_MATCH) {
        let ctx = GateContext::for_request(cache, &request);

        if let Some(entry) = cache.lookup(&ctx.key).await {
            if !EtagCodec::matches_strong(entry.etag(), if_match) {
                debug!(path = %path, current = %entry.etag(), "If-Match precondition failed");

                let mut response = ApiError::precondition_failed(format!(
                    "If-Match does not match the current representation of {}",
                    ctx.path
                ))
                .into_response();
                set_header(response.headers_mut(), header::ETAG, entry.etag());
                return response;
            }
        }
    }

    let response = next.run(request).await;

    if response.status().is_success() {
        let purged = cache.invalidate_path(&path).await;
        debug!(path = %path, purged, "Invalidated cached representations after write");
    }

    response
}

/// Runs the handler and buffers its response; spawned by the single-flight
/// so a disconnecting client does not cancel it
fn fetch(
    cache: ResponseCacheService,
    ctx: &GateContext,
    next: Next,
    request: Request<Body>,
) -> impl Future<Output = Result<BufferedResponse, DomainError>> + Send + 'static {
    let key = ctx.key.clone();
    let path = ctx.path.clone();
    let policy = ctx.policy.clone();

    async move {
        let response = next.run(request).await;
        cache.capture(&key, &path, &policy, response).await
    }
}

fn spawn_refresh(
    cache: &ResponseCacheService,
    ctx: &GateContext,
    next: Next,
    request: &Request<Body>,
) {
    let refresh = refresh_request(request);
    let fut = fetch(cache.clone(), ctx, next, refresh);
    let cache = cache.clone();
    let key = ctx.key.clone();

    tokio::spawn(async move {
        let (result, role) = cache.coalesce(&key, fut).await;

        match result {
            Ok(buffered) => debug!(
                key = %key,
                status = %buffered.status.as_u16(),
                joined = role == FlightRole::Waiter,
                "Background refresh finished"
            ),
            Err(e) => warn!(key = %key, error = %e, "Background refresh failed"),
        }
    });
}

/// Unconditional copy of a GET request for the background refresh
fn refresh_request(request: &Request<Body>) -> Request<Body> {
    let mut refresh = Request::new(Body::empty());
    *refresh.method_mut() = Method::GET;
    *refresh.uri_mut() = request.uri().clone();
    *refresh.headers_mut() = request.headers().clone();
    refresh.headers_mut().remove(header::IF_NONE_MATCH);
    refresh.headers_mut().remove(header::IF_MODIFIED_SINCE);

    if let Some(identity) = request.extensions().get::<ClientIdentity>() {
        refresh.extensions_mut().insert(identity.clone());
    }

    refresh
}

fn serve_entry(ctx: &GateContext, entry: &CacheEntry, outcome: CacheOutcome) -> Response {
    let age = entry.age_at(Utc::now());

    if ctx.client_has(entry) {
        record_cache_lookup(ctx.policy.class, CacheOutcome::NotModified);
        return not_modified(entry, age, HIT);
    }

    record_cache_lookup(ctx.policy.class, outcome);

    let mut response = Response::new(Body::from(entry.payload().clone()));
    let headers = response.headers_mut();
    set_header(headers, header::CONTENT_TYPE, entry.content_type());
    apply_validators(headers, entry, age, HIT);
    response
}

fn miss_response(ctx: &GateContext, buffered: &BufferedResponse, role: FlightRole) -> Response {
    let Some(entry) = &buffered.entry else {
        let mut response = buffered.to_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static(MISS));
        return response;
    };

    if ctx.client_has(entry) {
        return not_modified(entry, 0, MISS);
    }

    let mut response = buffered.to_response();
    apply_validators(response.headers_mut(), entry, 0, MISS);

    if role == FlightRole::Waiter {
        debug!(key = %ctx.key, "Served coalesced response");
    }

    response
}

fn not_modified(entry: &CacheEntry, age: u64, cache_status: &'static str) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    apply_validators(response.headers_mut(), entry, age, cache_status);
    response
}

fn apply_validators(headers: &mut HeaderMap, entry: &CacheEntry, age: u64, cache_status: &'static str) {
    set_header(headers, header::ETAG, entry.etag());
    set_header(headers, header::CACHE_CONTROL, entry.cache_control());
    headers.insert(header::AGE, HeaderValue::from(age));
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status));
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::routing::get;
    use axum::Router;
    use bytes::Bytes;
    use futures::future::join_all;
    use tower::ServiceExt;

    use super::*;
    use crate::api::state::test_support::{idle_upstream, state_with, test_config};
    use crate::config::AppConfig;
    use crate::domain::cache::UnavailableStore;
    use crate::infrastructure::services::CacheTags;

    struct Harness {
        app: Router,
        state: AppState,
        calls: Arc<AtomicUsize>,
    }

    /// Router whose handlers count calls and return `{"n":<call number>}`
    fn harness_with(state: AppState, handler_delay: Duration) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));

        let read_calls = calls.clone();
        let read = move || {
            let calls = read_calls.clone();
            async move {
                tokio::time::sleep(handler_delay).await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let mut response = (
                    [(header::CONTENT_TYPE, "application/json")],
                    format!(r#"{{"n":{}}}"#, n),
                )
                    .into_response();
                response
                    .extensions_mut()
                    .insert(CacheTags::new(["section:articles"]));
                response
            }
        };

        let write_calls = calls.clone();
        let write = move || {
            let calls = write_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::NO_CONTENT
            }
        };

        let missing_calls = calls.clone();
        let missing = move || {
            let calls = missing_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        };

        let app = Router::new()
            .route("/api/missing", get(missing))
            .route("/api/{*path}", get(read.clone()).put(write))
            .route("/admin/{*path}", get(read))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                conditional_request_middleware,
            ))
            .with_state(state.clone());

        Harness { app, state, calls }
    }

    fn harness() -> Harness {
        harness_with(state_with(idle_upstream(), &test_config()), Duration::ZERO)
    }

    fn get_req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn conditional_get(path: &str, etag: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::IF_NONE_MATCH, etag)
            .body(Body::empty())
            .unwrap()
    }

    fn put_req(path: &str, if_match: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::PUT).uri(path);
        if let Some(etag) = if_match {
            builder = builder.header(header::IF_MATCH, etag);
        }
        builder.body(Body::from(r#"{"title":"edited"}"#)).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    async fn backdated_entry(state: &AppState, path: &str, age_secs: i64, ttl: u64, stale: u64) {
        let cache = &state.response_cache;
        let key = cache.key_for(path, &RequestVariant::default());
        let entry = CacheEntry::new(key, Bytes::from_static(br#"{"n":0}"#), "application/json")
            .with_ttl(ttl, stale)
            .with_cache_control(cache.policy_for(path).cache_control())
            .with_tags([ResponseCacheService::path_tag(path)])
            .with_stored_at(Utc::now() - chrono::Duration::seconds(age_secs));
        cache.persist(&entry).await;
    }

    #[tokio::test]
    async fn test_conditional_round_trip_returns_304() {
        let h = harness();

        let (status, headers, body) = send(&h.app, get_req("/api/articles/42")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[X_CACHE], "MISS");
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "public, max-age=1800, stale-while-revalidate=3600"
        );
        let etag = headers[header::ETAG].to_str().unwrap().to_string();
        assert_eq!(etag, EtagCodec::compute(&body));

        let (status, headers, body) =
            send(&h.app, conditional_get("/api/articles/42", &etag)).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(body.is_empty());
        assert_eq!(headers[header::ETAG], etag.as_str());
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(headers[header::AGE], "0");
        assert!(headers.contains_key(header::CACHE_CONTROL));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_etag_returns_full_body() {
        let h = harness();
        send(&h.app, get_req("/api/articles/1")).await;

        let (status, headers, body) =
            send(&h.app, conditional_get("/api/articles/1", "\"stale-tag\"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(&body[..], br#"{"n":1}"#);
    }

    #[tokio::test]
    async fn test_warm_cache_never_reaches_handler() {
        let h = harness();

        let (_, first_headers, first_body) = send(&h.app, get_req("/api/books/7")).await;
        for _ in 0..5 {
            let (status, headers, body) = send(&h.app, get_req("/api/books/7")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers[X_CACHE], "HIT");
            assert_eq!(headers[header::ETAG], first_headers[header::ETAG]);
            assert_eq!(headers[header::CONTENT_TYPE], "application/json");
            assert_eq!(body, first_body);
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_requests_are_coalesced() {
        let h = harness_with(
            state_with(idle_upstream(), &test_config()),
            Duration::from_millis(100),
        );

        let requests = (0..10).map(|_| send(&h.app, get_req("/api/articles/9")));
        let responses = join_all(requests).await;

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let (_, first_headers, first_body) = &responses[0];
        for (status, headers, body) in &responses {
            assert_eq!(*status, StatusCode::OK);
            assert_eq!(headers[header::ETAG], first_headers[header::ETAG]);
            assert_eq!(body, first_body);
        }
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let h = harness();
        backdated_entry(&h.state, "/api/books/1", 301, 300, 0).await;

        let (status, headers, body) = send(&h.app, get_req("/api/books/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[X_CACHE], "MISS");
        assert_eq!(&body[..], br#"{"n":1}"#);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_without_opt_in_is_a_miss() {
        let h = harness();
        backdated_entry(&h.state, "/api/books/2", 301, 300, 600).await;

        let (_, headers, _) = send(&h.app, get_req("/api/books/2")).await;
        assert_eq!(headers[X_CACHE], "MISS");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_served_while_refreshing() {
        let h = harness();
        backdated_entry(&h.state, "/api/search", 301, 300, 600).await;

        let (status, headers, body) = send(&h.app, get_req("/api/search")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(headers[header::AGE], "301");
        assert_eq!(&body[..], br#"{"n":0}"#);

        for _ in 0..50 {
            if h.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let mut refreshed = false;
        for _ in 0..50 {
            let (_, headers, body) = send(&h.app, get_req("/api/search")).await;
            if &body[..] == br#"{"n":1}"# {
                assert_eq!(headers[header::AGE], "0");
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_if_match_mismatch_is_rejected_without_mutation() {
        let h = harness();
        let (_, headers, body) = send(&h.app, get_req("/api/articles/5")).await;
        let etag = headers[header::ETAG].to_str().unwrap().to_string();

        let (status, headers, _) =
            send(&h.app, put_req("/api/articles/5", Some("\"old-etag\""))).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(headers[header::ETAG], etag.as_str());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let (_, headers, cached) = send(&h.app, get_req("/api/articles/5")).await;
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(cached, body);
    }

    #[tokio::test]
    async fn test_matching_if_match_writes_and_invalidates() {
        let h = harness();
        send(&h.app, get_req("/api/articles/6")).await;
        send(
            &h.app,
            Request::builder()
                .uri("/api/articles/6")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let (_, headers, _) = send(&h.app, get_req("/api/articles/6")).await;
        let etag = headers[header::ETAG].to_str().unwrap().to_string();
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);

        let (status, _, _) = send(&h.app, put_req("/api/articles/6", Some(&etag))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);

        let (_, headers, _) = send(&h.app, get_req("/api/articles/6")).await;
        assert_eq!(headers[X_CACHE], "MISS");
        assert_eq!(h.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_if_match_without_cached_entry_passes_through() {
        let h = harness();

        let (status, _, _) = send(&h.app, put_req("/api/articles/77", Some("\"any\""))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_store_routes_are_never_cached() {
        let h = harness();

        for expected in 1..=2 {
            let (status, headers, _) = send(&h.app, get_req("/admin/report")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers[header::CACHE_CONTROL], NO_STORE_DIRECTIVE);
            assert!(headers.get(X_CACHE).is_none());
            assert_eq!(h.calls.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test]
    async fn test_oversized_responses_pass_through_uncached() {
        let mut config = test_config();
        config.cache.max_body_bytes = 4;
        let h = harness_with(state_with(idle_upstream(), &config), Duration::ZERO);

        for expected in 1..=2 {
            let (status, headers, body) = send(&h.app, get_req("/api/articles/big")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers[X_CACHE], "MISS");
            assert!(headers.get(header::ETAG).is_none());
            assert_eq!(body, format!(r#"{{"n":{}}}"#, expected));
            assert_eq!(h.calls.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test]
    async fn test_error_responses_are_not_stored() {
        let h = harness();

        for _ in 0..2 {
            let (status, headers, _) = send(&h.app, get_req("/api/missing")).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(headers.get(header::ETAG).is_none());
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_lookup() {
        let h = harness();
        send(&h.app, get_req("/api/articles/3")).await;

        let mut forced = get_req("/api/articles/3");
        forced.extensions_mut().insert(ForceRefresh);
        let (_, headers, body) = send(&h.app, forced).await;
        assert_eq!(headers[X_CACHE], "MISS");
        assert_eq!(&body[..], br#"{"n":2}"#);

        let (_, headers, body) = send(&h.app, get_req("/api/articles/3")).await;
        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(&body[..], br#"{"n":2}"#);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_passthrough() {
        let state = AppState::new(
            Arc::new(UnavailableStore),
            Arc::new(idle_upstream()),
            &test_config(),
        )
        .unwrap();
        let h = harness_with(state, Duration::ZERO);

        for expected in 1..=2 {
            let (status, headers, _) = send(&h.app, get_req("/api/articles/8")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers[X_CACHE], "MISS");
            assert_eq!(h.calls.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test]
    async fn test_personalized_routes_vary_by_identity() {
        let mut config: AppConfig = test_config();
        config.cache.routes = vec![serde_json::from_value(serde_json::json!({
            "pattern": "^/api/feed",
            "class": "short",
            "personalized": true
        }))
        .unwrap()];
        let h = harness_with(state_with(idle_upstream(), &config), Duration::ZERO);

        let as_user = |user: &str| {
            let mut request = get_req("/api/feed");
            request
                .extensions_mut()
                .insert(ClientIdentity::User(user.to_string()));
            request
        };

        let (_, headers, _) = send(&h.app, as_user("alice")).await;
        assert_eq!(headers[header::CACHE_CONTROL], "private, max-age=300, stale-while-revalidate=600");
        send(&h.app, as_user("bob")).await;
        let (_, headers, _) = send(&h.app, as_user("alice")).await;

        assert_eq!(headers[X_CACHE], "HIT");
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_head_requests_pass_through() {
        let h = harness();
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/api/articles/1")
            .body(Body::empty())
            .unwrap();

        let (status, headers, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(X_CACHE).is_none());
    }
}
