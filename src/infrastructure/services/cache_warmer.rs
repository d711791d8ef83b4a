//! Cache warming by replaying requests through the full dispatch path

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tracing::{info, warn};

use crate::domain::{ClientIdentity, DomainError, WarmFailure, WarmRequest, WarmingReport};
use crate::infrastructure::observability::record_warming_run;

use super::response_cache_service::ForceRefresh;

/// Identity warm traffic is rate limited under
pub const WARMER_IDENTITY: &str = "cache-warmer";

/// Something that can serve a request the way live traffic is served
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(&self, request: Request<Body>) -> Result<Response, DomainError>;
}

#[async_trait]
impl RequestDispatcher for Router {
    async fn dispatch(&self, request: Request<Body>) -> Result<Response, DomainError> {
        self.clone()
            .oneshot(request)
            .await
            .map_err(|never: Infallible| match never {})
    }
}

/// Configuration for the cache warmer
#[derive(Debug, Clone)]
pub struct CacheWarmerConfig {
    pub targets: Vec<WarmRequest>,
    /// Requests in flight at once during a pass
    pub concurrency: usize,
}

impl Default for CacheWarmerConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            concurrency: 4,
        }
    }
}

/// Replays configured GET requests so hot entries are fresh before clients ask
pub struct CacheWarmer<D: RequestDispatcher> {
    dispatcher: D,
    config: CacheWarmerConfig,
    last_report: RwLock<Option<WarmingReport>>,
}

impl<D: RequestDispatcher> std::fmt::Debug for CacheWarmer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("config", &self.config)
            .finish()
    }
}

impl<D: RequestDispatcher + 'static> CacheWarmer<D> {
    pub fn new(dispatcher: D, config: CacheWarmerConfig) -> Self {
        Self {
            dispatcher,
            config,
            last_report: RwLock::new(None),
        }
    }

    pub fn targets(&self) -> &[WarmRequest] {
        &self.config.targets
    }

    /// Warms every target once
    pub async fn run_once(&self) -> WarmingReport {
        let started_at = Utc::now();
        let start = Instant::now();

        let outcomes: Vec<Result<(), WarmFailure>> = stream::iter(self.config.targets.clone())
            .map(|target| self.warm(target))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let attempted = outcomes.len();
        let failed: Vec<WarmFailure> = outcomes.into_iter().filter_map(Result::err).collect();
        let succeeded = attempted - failed.len();
        let duration = start.elapsed();

        record_warming_run(succeeded, failed.len(), duration);

        if failed.is_empty() {
            info!(attempted, duration_ms = duration.as_millis() as u64, "Cache warming complete");
        } else {
            warn!(
                attempted,
                failed = failed.len(),
                duration_ms = duration.as_millis() as u64,
                "Cache warming finished with failures"
            );
        }

        let report = WarmingReport {
            attempted,
            succeeded,
            failed,
            started_at,
            duration_ms: duration.as_millis() as u64,
        };

        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn warm(&self, target: WarmRequest) -> Result<(), WarmFailure> {
        let failure = |reason: String| WarmFailure {
            path: target.path.clone(),
            reason,
        };

        let request = build_request(&target).map_err(|e| failure(e.to_string()))?;
        let response = self
            .dispatcher
            .dispatch(request)
            .await
            .map_err(|e| failure(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(failure(format!("HTTP {}", status.as_u16()))),
        }
    }

    /// Report from the most recent pass
    pub async fn last_report(&self) -> Option<WarmingReport> {
        self.last_report.read().await.clone()
    }

    /// Runs a pass immediately, then once per `interval`
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}

fn build_request(target: &WarmRequest) -> Result<Request<Body>, DomainError> {
    let mut builder = Request::builder().method(Method::GET).uri(&target.path);

    if let Some(accept) = &target.accept {
        builder = builder.header(header::ACCEPT, accept);
    }

    let mut request = builder
        .body(Body::empty())
        .map_err(|e| DomainError::validation(format!("Invalid warm target '{}': {}", target.path, e)))?;

    request.extensions_mut().insert(ForceRefresh);
    request
        .extensions_mut()
        .insert(ClientIdentity::User(WARMER_IDENTITY.to_string()));

    Ok(request)
}
