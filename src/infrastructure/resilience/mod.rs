//! Resilience infrastructure - circuit breakers and rate limiting

mod circuit_breaker;
mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RATE_LIMIT_NAMESPACE};
