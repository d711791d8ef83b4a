//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsSettings;
use crate::domain::{CircuitState, EndpointClass, RouteClass};

/// Prometheus metrics handle for serving metrics endpoint
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics as a string for the /metrics endpoint
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsSettings) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("gateway_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

            tracing::info!("Prometheus metrics initialized at {}", config.path);

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Create the metrics router
pub fn create_metrics_router(metrics: PrometheusMetrics, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<PrometheusMetrics>) -> impl IntoResponse {
    metrics.render()
}

/// How the conditional gate answered a GET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Stale,
    NotModified,
    Miss,
    Bypass,
}

impl CacheOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stale => "stale",
            Self::NotModified => "not_modified",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

/// Record an HTTP request metric
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());

    if status >= 500 {
        counter!("http_server_errors_total", &labels).increment(1);
    }
}

pub fn record_cache_lookup(class: RouteClass, outcome: CacheOutcome) {
    counter!(
        "gateway_cache_requests_total",
        "class" => class.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// A request joined an in-flight fetch instead of starting its own
pub fn record_coalesced_waiter() {
    counter!("gateway_cache_coalesced_total").increment(1);
}

pub fn record_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "gateway_circuit_transitions_total",
        "breaker" => name.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);

    let open = if to == CircuitState::Closed { 0.0 } else { 1.0 };
    gauge!("gateway_circuit_open", "breaker" => name.to_string()).set(open);
}

pub fn record_breaker_rejection(name: &str) {
    counter!("gateway_circuit_rejections_total", "breaker" => name.to_string()).increment(1);
}

pub fn record_rate_limit(class: EndpointClass, allowed: bool) {
    let decision = if allowed { "allowed" } else { "rejected" };
    counter!(
        "gateway_rate_limit_decisions_total",
        "class" => class.as_str(),
        "decision" => decision
    )
    .increment(1);
}

/// The shared store was unreachable and a component failed open
pub fn record_store_degraded(component: &'static str) {
    counter!("gateway_store_degraded_total", "component" => component).increment(1);
}

pub fn record_warming_run(succeeded: usize, failed: usize, duration: Duration) {
    counter!("gateway_warm_requests_total", "result" => "succeeded").increment(succeeded as u64);
    counter!("gateway_warm_requests_total", "result" => "failed").increment(failed as u64);
    histogram!("gateway_warm_run_duration_seconds").record(duration.as_secs_f64());
}

/// Sanitize URL path for metric labels (remove IDs, limit cardinality)
fn sanitize_path(path: &str) -> String {
    static UUID: std::sync::LazyLock<Option<regex::Regex>> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").ok()
    });
    static NUMERIC: std::sync::LazyLock<Option<regex::Regex>> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"/\d+(/|$)").ok());

    let mut path = path.to_string();

    if let Some(re) = UUID.as_ref() {
        path = re.replace_all(&path, "{id}").into_owned();
    }

    if let Some(re) = NUMERIC.as_ref() {
        path = re.replace_all(&path, "/{id}$1").into_owned();
    }

    path.chars().take(50).collect()
}
