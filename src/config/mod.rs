//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, CacheSettings, CircuitBreakerSettings, LogFormat, LoggingConfig, MetricsSettings,
    RateLimitRuleSettings, RateLimitSettings, SecuritySettings, ServerConfig, StoreSettings,
    UpstreamSettings, WarmTargetSettings, WarmerSettings,
};
