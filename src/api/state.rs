//! Application state for shared services

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::domain::{CacheStore, DomainError, UpstreamClient};
use crate::infrastructure::cache::InvalidationIndex;
use crate::infrastructure::resilience::{CircuitBreakerRegistry, RateLimiter};
use crate::infrastructure::services::ResponseCacheService;

/// How the rate limiter identifies callers
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    /// Header carrying the user id set by the upstream auth layer
    pub user_header: String,
    pub trust_forwarded_for: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            user_header: "x-user-id".to_string(),
            trust_forwarded_for: false,
        }
    }
}

/// Application state shared by handlers and middleware.
///
/// Every component is injected here at construction time; nothing is global.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CacheStore>,
    pub response_cache: ResponseCacheService,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub rate_limiter: RateLimiter,
    pub rate_limit_enabled: bool,
    pub upstream: Arc<dyn UpstreamClient>,
    pub identity: IdentitySettings,
    /// SHA-256 hex of the admin key; admin routes are closed when unset
    pub admin_key_hash: Option<String>,
}

impl AppState {
    /// Wires every component from configuration around an existing store
    /// and upstream client
    pub fn new(
        store: Arc<dyn CacheStore>,
        upstream: Arc<dyn UpstreamClient>,
        config: &AppConfig,
    ) -> Result<Self, DomainError> {
        let cache_config = config.cache.to_response_cache_config();
        let invalidation = InvalidationIndex::new(store.clone(), cache_config.tag_ttl);
        let policies = Arc::new(config.cache.to_policy_table()?);

        let response_cache =
            ResponseCacheService::new(store.clone(), invalidation, policies, cache_config);

        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.to_breaker_config(),
        ));

        let rate_limiter = RateLimiter::new(store.clone(), config.rate_limit.to_limiter_config());

        Ok(Self {
            store,
            response_cache,
            breakers,
            rate_limiter,
            rate_limit_enabled: config.rate_limit.enabled,
            upstream,
            identity: IdentitySettings {
                user_header: config.security.identity_header.to_lowercase(),
                trust_forwarded_for: config.security.trust_forwarded_for,
            },
            admin_key_hash: config
                .security
                .admin_api_key
                .as_deref()
                .filter(|key| !key.is_empty())
                .map(hash_admin_key),
        })
    }

    pub fn invalidation(&self) -> &InvalidationIndex {
        self.response_cache.invalidation()
    }
}

/// Hex SHA-256 of an admin key, as compared by the admin extractor
pub fn hash_admin_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
