//! Admin API endpoints for cache and circuit breaker operations

pub mod cache;
pub mod circuit_breakers;

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::state::AppState;

/// Create admin API router
pub fn create_admin_router() -> Router<AppState> {
    Router::new()
        // Cache invalidation
        .route("/cache/invalidate", post(cache::invalidate_tag))
        .route("/cache/keys", delete(cache::delete_keys))
        .route("/cache/tags/{*tag}", get(cache::get_tag_keys))
        // Circuit breakers
        .route(
            "/circuit-breakers",
            get(circuit_breakers::list_circuit_breakers),
        )
        .route(
            "/circuit-breakers/{name}",
            get(circuit_breakers::get_circuit_breaker),
        )
        .route(
            "/circuit-breakers/{name}/reset",
            post(circuit_breakers::reset_circuit_breaker),
        )
        .route(
            "/circuit-breakers/{name}/open",
            post(circuit_breakers::open_circuit_breaker),
        )
}
