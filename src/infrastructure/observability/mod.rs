//! Observability infrastructure - Prometheus metrics

mod metrics;

pub use metrics::{
    create_metrics_router, init_metrics, record_breaker_rejection, record_breaker_transition,
    record_cache_lookup, record_coalesced_waiter, record_http_request, record_rate_limit,
    record_store_degraded, record_warming_run, CacheOutcome, PrometheusMetrics,
};
