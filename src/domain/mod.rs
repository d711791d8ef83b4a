//! Domain layer - Core types, traits and errors

pub mod cache;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limit;
pub mod upstream;
pub mod warming;

pub use cache::{
    CacheEntry, CacheKeyGenerator, CacheKeyParams, CachePolicyTable, CacheStore, CacheStoreExt,
    DefaultKeyGenerator, EtagCodec, Freshness, RouteClass, RoutePolicy,
};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use error::DomainError;
pub use rate_limit::{ClientIdentity, EndpointClass, RateLimitDecision, RateLimitRule};
pub use upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use warming::{WarmFailure, WarmRequest, WarmingReport};
