//! Rate limiter implementation
//!
//! Distributed fixed-window limiting on top of the store's atomic
//! increment, so every gateway instance shares one counter per key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::domain::rate_limit::ceil_seconds;
use crate::domain::{
    CacheStore, ClientIdentity, EndpointClass, RateLimitDecision, RateLimitRule,
};
use crate::infrastructure::observability::{record_rate_limit, record_store_degraded};

/// Namespace for rate limit counters in the store
pub const RATE_LIMIT_NAMESPACE: &str = "rl";

/// Per-class rules plus retry jitter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub rules: HashMap<EndpointClass, RateLimitRule>,
    /// Upper bound of the random delay added to `Retry-After`
    pub max_retry_jitter: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let rules = [
            EndpointClass::General,
            EndpointClass::Auth,
            EndpointClass::Admin,
        ]
        .into_iter()
        .map(|class| (class, RateLimitRule::default_for(class)))
        .collect();

        Self {
            rules,
            max_retry_jitter: Duration::from_secs(3),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rule(mut self, class: EndpointClass, rule: RateLimitRule) -> Self {
        self.rules.insert(class, rule);
        self
    }

    pub fn with_max_retry_jitter(mut self, jitter: Duration) -> Self {
        self.max_retry_jitter = jitter;
        self
    }

    pub fn rule(&self, class: EndpointClass) -> RateLimitRule {
        self.rules
            .get(&class)
            .copied()
            .unwrap_or_else(|| RateLimitRule::default_for(class))
    }
}

/// Fixed-window rate limiter keyed by endpoint class and client identity
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Store key of the counter for a class and identity
    pub fn counter_key(class: EndpointClass, identity: &ClientIdentity) -> String {
        format!("{}:{}:{}", RATE_LIMIT_NAMESPACE, class, identity)
    }

    /// Counts one request and decides whether it may proceed.
    ///
    /// Never fails: an unreachable store lets the request through and
    /// marks the decision as degraded.
    pub async fn check(&self, class: EndpointClass, identity: &ClientIdentity) -> RateLimitDecision {
        let rule = self.config.rule(class);
        let key = Self::counter_key(class, identity);

        let snapshot = match self.store.increment_and_expire(&key, rule.window).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    degraded = true,
                    key = %key,
                    error = %e,
                    "Rate limit store unavailable, failing open"
                );
                record_store_degraded("rate_limiter");
                return RateLimitDecision::degraded(rule);
            }
        };

        let allowed = snapshot.count <= rule.limit;
        record_rate_limit(class, allowed);

        let retry_after = (!allowed).then(|| {
            let jitter = self.retry_jitter();
            Duration::from_secs(ceil_seconds(snapshot.ttl)) + jitter
        });

        if !allowed {
            debug!(
                key = %key,
                count = snapshot.count,
                limit = rule.limit,
                "Rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed,
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(snapshot.count),
            reset_after: snapshot.ttl,
            retry_after,
            degraded: false,
        }
    }

    fn retry_jitter(&self) -> Duration {
        let max_secs = self.config.max_retry_jitter.as_secs();

        if max_secs == 0 {
            return Duration::ZERO;
        }

        Duration::from_secs(rand::thread_rng().gen_range(0..=max_secs))
    }
}
