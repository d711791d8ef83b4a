use axum::{
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::admin;
use super::content;
use super::health;
use super::middleware::{
    conditional_request_middleware, logging_middleware, metrics_middleware,
    problem_context_middleware, rate_limit_middleware,
};
use super::state::AppState;
use super::types::ApiError;
use crate::infrastructure::observability::{create_metrics_router, PrometheusMetrics};

/// Create the full router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    create_router_with_metrics(state, None)
}

/// Create the full router, exposing Prometheus metrics at `(handle, path)` when given.
///
/// Health and metrics endpoints sit outside the rate limiter; content and
/// admin routes pass through it, and content routes also pass through the
/// conditional gate.
pub fn create_router_with_metrics(
    state: AppState,
    metrics: Option<(PrometheusMetrics, String)>,
) -> Router {
    // Content API behind the conditional gate
    let content = Router::new()
        .nest("/api", content::create_content_router())
        .layer(from_fn_with_state(
            state.clone(),
            conditional_request_middleware,
        ));

    // Everything callers can exhaust is rate limited
    let limited = Router::new()
        .merge(content)
        .nest("/admin", admin::create_admin_router())
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    let mut app = Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        .merge(limited)
        .fallback(not_found)
        .route_layer(from_fn(metrics_middleware))
        .with_state(state);

    if let Some((handle, path)) = metrics {
        app = app.merge(create_metrics_router(handle, &path));
    }

    app.layer(from_fn(logging_middleware))
        .layer(from_fn(problem_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn not_found() -> impl IntoResponse {
    ApiError::not_found("No route matches this path")
}
