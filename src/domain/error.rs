use std::time::Duration;

use thiserror::Error;

/// Core domain errors
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    /// The shared cache/counter backend could not be reached
    #[error("Cache store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The upstream content API failed or timed out
    #[error("Upstream error: {upstream} - {message}")]
    Upstream { upstream: String, message: String },

    /// The call was not attempted because the circuit is open
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("Rate limit exceeded for {key}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn upstream(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn circuit_open(name: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitOpen {
            name: name.into(),
            retry_after,
        }
    }

    pub fn rate_limited(key: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            key: key.into(),
            retry_after,
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Whether this error should count against a circuit breaker.
    ///
    /// Client-side outcomes (missing resources, bad input, stale preconditions)
    /// say nothing about the health of the dependency.
    pub fn is_dependency_failure(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. }
                | Self::Validation { .. }
                | Self::PreconditionFailed { .. }
                | Self::Unauthorized { .. }
        )
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
