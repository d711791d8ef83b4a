use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::{CachePolicyTable, ClassLifetime, RouteClass, RouteRule};
use crate::domain::{CircuitBreakerConfig, DomainError, EndpointClass, RateLimitRule, WarmRequest};
use crate::infrastructure::cache::StoreConfig;
use crate::infrastructure::resilience::RateLimiterConfig;
use crate::infrastructure::services::{CacheWarmerConfig, ResponseCacheConfig};
use crate::infrastructure::upstream::HttpUpstreamConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub store: StoreSettings,
    pub upstream: UpstreamSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub warmer: WarmerSettings,
    pub security: SecuritySettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Cache store backend selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `memory` or `redis`
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub connection_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_capacity: u64,
    /// Use the in-memory store when Redis is unreachable at startup
    pub fallback_to_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Breaker name and log label
    pub name: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub api_key: Option<String>,
    pub api_key_header: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub max_cooldown_secs: u64,
    pub backoff_multiplier: f64,
    pub jitter_ratio: f64,
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitRuleSettings {
    pub limit: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub general: Option<RateLimitRuleSettings>,
    pub auth: Option<RateLimitRuleSettings>,
    pub admin: Option<RateLimitRuleSettings>,
    pub max_retry_jitter_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassLifetimeSettings {
    pub ttl_secs: u64,
    #[serde(default)]
    pub stale_secs: u64,
}

/// A configured route pattern, checked before the built-in table
#[derive(Debug, Clone, Deserialize)]
pub struct RouteOverrideSettings {
    pub pattern: String,
    pub class: String,
    pub serve_stale: Option<bool>,
    #[serde(default)]
    pub personalized: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_body_bytes: usize,
    pub tag_ttl_secs: u64,
    /// Lifetime overrides keyed by class name (`short`, `medium`, ...)
    pub lifetimes: HashMap<String, ClassLifetimeSettings>,
    pub routes: Vec<RouteOverrideSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarmTargetSettings {
    pub path: String,
    pub accept: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmerSettings {
    /// Run the warmer inside `serve`
    pub enabled: bool,
    pub interval_secs: u64,
    pub concurrency: usize,
    pub targets: Vec<WarmTargetSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Plain admin key; hashed at startup
    pub admin_api_key: Option<String>,
    /// Header the external auth layer uses to pass the authenticated user id
    pub identity_header: String,
    pub trust_forwarded_for: bool,
}

/// Prometheus exposition
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Route the scrape endpoint is mounted on, outside the rate limiter
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            key_prefix: "cg:".to_string(),
            connection_timeout_ms: 5_000,
            operation_timeout_ms: 500,
            max_capacity: 10_000,
            fallback_to_memory: true,
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            name: "content-api".to_string(),
            base_url: "http://localhost:9000".to_string(),
            timeout_ms: 10_000,
            api_key: None,
            api_key_header: "x-api-key".to_string(),
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            cooldown_secs: defaults.cooldown.as_secs(),
            max_cooldown_secs: defaults.max_cooldown.as_secs(),
            backoff_multiplier: defaults.backoff_multiplier,
            jitter_ratio: defaults.jitter_ratio,
            call_timeout_ms: defaults.call_timeout.as_millis() as u64,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            general: None,
            auth: None,
            admin: None,
            max_retry_jitter_secs: 3,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = ResponseCacheConfig::default();
        Self {
            max_body_bytes: defaults.max_body_bytes,
            tag_ttl_secs: defaults.tag_ttl.as_secs(),
            lifetimes: HashMap::new(),
            routes: Vec::new(),
        }
    }
}

impl Default for WarmerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            concurrency: 4,
            targets: Vec::new(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            admin_api_key: None,
            identity_header: "x-user-id".to_string(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl StoreSettings {
    pub fn to_store_config(&self) -> Result<StoreConfig, DomainError> {
        let store_type = self.backend.parse()?;
        let config = StoreConfig {
            store_type,
            redis_url: self.redis_url.clone(),
            key_prefix: Some(self.key_prefix.clone()).filter(|p| !p.is_empty()),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            max_capacity: self.max_capacity,
            fallback_to_memory: self.fallback_to_memory,
        };

        Ok(config)
    }
}

impl UpstreamSettings {
    pub fn to_client_config(&self) -> HttpUpstreamConfig {
        let config = HttpUpstreamConfig::new(&self.name, &self.base_url)
            .with_timeout(Duration::from_millis(self.timeout_ms));

        match &self.api_key {
            Some(key) => config.with_header(&self.api_key_header, key),
            None => config,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.failure_threshold, Duration::from_secs(self.cooldown_secs))
            .with_max_cooldown(Duration::from_secs(self.max_cooldown_secs))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_jitter_ratio(self.jitter_ratio)
            .with_call_timeout(Duration::from_millis(self.call_timeout_ms))
    }
}

impl RateLimitSettings {
    pub fn to_limiter_config(&self) -> RateLimiterConfig {
        let mut config = RateLimiterConfig::default()
            .with_max_retry_jitter(Duration::from_secs(self.max_retry_jitter_secs));

        let overrides = [
            (EndpointClass::General, &self.general),
            (EndpointClass::Auth, &self.auth),
            (EndpointClass::Admin, &self.admin),
        ];

        for (class, rule) in overrides {
            let Some(rule) = rule else { continue };
            config = config.with_rule(
                class,
                RateLimitRule::new(rule.limit, Duration::from_secs(rule.window_secs)),
            );
        }

        config
    }
}

impl CacheSettings {
    pub fn to_response_cache_config(&self) -> ResponseCacheConfig {
        ResponseCacheConfig {
            max_body_bytes: self.max_body_bytes,
            tag_ttl: Duration::from_secs(self.tag_ttl_secs),
        }
    }

    /// Builds the policy table; configured routes take precedence in the
    /// order they are listed
    pub fn to_policy_table(&self) -> Result<CachePolicyTable, DomainError> {
        let mut table = CachePolicyTable::default();

        for (class, lifetime) in &self.lifetimes {
            let class: RouteClass = class.parse()?;
            table = table.with_lifetime(
                class,
                ClassLifetime::new(lifetime.ttl_secs, lifetime.stale_secs),
            );
        }

        for route in self.routes.iter().rev() {
            let mut rule = RouteRule::new(&route.pattern, route.class.parse()?)?;
            if let Some(serve_stale) = route.serve_stale {
                rule = rule.with_serve_stale(serve_stale);
            }
            if route.personalized {
                rule = rule.personalized();
            }
            table = table.with_override(rule);
        }

        Ok(table)
    }
}

impl WarmerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn to_warmer_config(&self) -> CacheWarmerConfig {
        let targets = self
            .targets
            .iter()
            .map(|t| {
                let request = WarmRequest::new(&t.path);
                match &t.accept {
                    Some(accept) => request.with_accept(accept),
                    None => request,
                }
            })
            .collect();

        CacheWarmerConfig {
            targets,
            concurrency: self.concurrency.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::StoreType;

    #[test]
    fn test_defaults_deserialize_from_empty_source() {
        let config: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.rate_limit.enabled);
        assert!(!config.warmer.enabled);
        assert_eq!(config.security.identity_header, "x-user-id");
    }

    #[test]
    fn test_nested_sections_from_json() {
        let json = r#"{
            "store": {"backend": "redis", "redis_url": "redis://cache:6379"},
            "rate_limit": {"auth": {"limit": 3, "window_secs": 60}},
            "cache": {
                "lifetimes": {"short": {"ttl_secs": 30, "stale_secs": 10}},
                "routes": [{"pattern": "^/api/feed", "class": "short", "personalized": true}]
            },
            "warmer": {"targets": [{"path": "/api/trending"}]}
        }"#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let store = config.store.to_store_config().unwrap();
        assert_eq!(store.store_type, StoreType::Redis);
        assert_eq!(store.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(store.key_prefix.as_deref(), Some("cg:"));

        let limiter = config.rate_limit.to_limiter_config();
        assert_eq!(limiter.rule(EndpointClass::Auth).limit, 3);
        assert_eq!(limiter.rule(EndpointClass::General).limit, 100);

        let table = config.cache.to_policy_table().unwrap();
        let feed = table.classify("/api/feed/mine");
        assert_eq!(feed.class, RouteClass::Short);
        assert!(feed.personalized);
        assert_eq!(feed.lifetime, ClassLifetime::new(30, 10));

        let warmer = config.warmer.to_warmer_config();
        assert_eq!(warmer.targets, vec![WarmRequest::new("/api/trending")]);
    }

    #[test]
    fn test_unknown_route_class_is_rejected() {
        let settings = CacheSettings {
            routes: vec![RouteOverrideSettings {
                pattern: "^/x".to_string(),
                class: "weekly".to_string(),
                serve_stale: None,
                personalized: false,
            }],
            ..Default::default()
        };

        assert!(settings.to_policy_table().is_err());
    }

    #[test]
    fn test_upstream_api_key_becomes_default_header() {
        let settings = UpstreamSettings {
            api_key: Some("k".to_string()),
            ..Default::default()
        };

        let config = settings.to_client_config();
        assert_eq!(
            config.default_headers,
            vec![("x-api-key".to_string(), "k".to_string())]
        );
    }
}
