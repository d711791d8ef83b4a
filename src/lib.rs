//! Content Gateway
//!
//! A caching and protection layer in front of an upstream content API:
//! - Tag-aware response cache over Redis or in-process storage
//! - ETag validation, conditional GETs and `If-Match` write preconditions
//! - Per-identity rate limiting and upstream circuit breaking
//! - Periodic cache warming through the live request path

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;

use api::state::AppState;
use axum::Router;
use infrastructure::cache::CacheStoreFactory;
use infrastructure::observability::PrometheusMetrics;
use infrastructure::upstream::HttpUpstreamClient;
use tracing::info;

/// Create the application state with default configuration
pub async fn create_app_state() -> anyhow::Result<AppState> {
    create_app_state_with_config(&AppConfig::default()).await
}

/// Create the application state with custom configuration
pub async fn create_app_state_with_config(config: &AppConfig) -> anyhow::Result<AppState> {
    let store_config = config.store.to_store_config()?;
    let store = CacheStoreFactory::new().create(&store_config).await?;

    info!(backend = store.backend_name(), "Cache store ready");

    let upstream = HttpUpstreamClient::new(config.upstream.to_client_config())?;

    info!(
        upstream = %config.upstream.name,
        base_url = %config.upstream.base_url,
        "Upstream client ready"
    );

    Ok(AppState::new(store, Arc::new(upstream), config)?)
}

/// Build the HTTP router, mounting the metrics endpoint when a recorder is installed
pub fn build_router(
    state: AppState,
    config: &AppConfig,
    metrics: Option<PrometheusMetrics>,
) -> Router {
    let metrics = metrics.map(|handle| (handle, config.metrics.path.clone()));
    api::create_router_with_metrics(state, metrics)
}
