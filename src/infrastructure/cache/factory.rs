//! Store factory for runtime backend selection

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;
use crate::infrastructure::observability::record_store_degraded;

use super::in_memory::{InMemoryCacheStore, InMemoryStoreConfig};
use super::redis::{RedisCacheStore, RedisStoreConfig};

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    /// Process-local store using moka
    #[default]
    InMemory,
    /// Shared Redis store
    Redis,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::InMemory => write!(f, "in_memory"),
            StoreType::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for StoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(StoreType::InMemory),
            "redis" => Ok(StoreType::Redis),
            _ => Err(DomainError::configuration(format!(
                "Unknown store type: {}. Valid types: in_memory, redis",
                s
            ))),
        }
    }
}

/// Configuration for the store factory
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub store_type: StoreType,
    /// Redis URL (required for the Redis type)
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub connection_timeout: Duration,
    pub operation_timeout: Duration,
    /// Maximum capacity of the in-memory store
    pub max_capacity: u64,
    /// Start on the in-memory store when Redis is unreachable at boot
    pub fallback_to_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::InMemory,
            redis_url: None,
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_millis(500),
            max_capacity: 10_000,
            fallback_to_memory: true,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            store_type: StoreType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_to_memory = false;
        self
    }
}

/// Factory for creating store instances
#[derive(Debug, Default)]
pub struct CacheStoreFactory;

impl CacheStoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates a store from configuration.
    ///
    /// An unreachable Redis falls back to the in-memory store when
    /// `fallback_to_memory` is set; configuration errors never fall back.
    pub async fn create(&self, config: &StoreConfig) -> Result<Arc<dyn CacheStore>, DomainError> {
        match config.store_type {
            StoreType::InMemory => Ok(self.create_in_memory(config.max_capacity)),
            StoreType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for the redis store type")
                })?;

                let mut redis_config = RedisStoreConfig::new(url)
                    .with_connection_timeout(config.connection_timeout)
                    .with_operation_timeout(config.operation_timeout);

                if let Some(prefix) = &config.key_prefix {
                    redis_config = redis_config.with_key_prefix(prefix.clone());
                }

                match RedisCacheStore::new(redis_config).await {
                    Ok(store) => {
                        info!("Connected to Redis store");
                        Ok(Arc::new(store))
                    }
                    Err(e) if e.is_store_unavailable() && config.fallback_to_memory => {
                        warn!(
                            degraded = true,
                            error = %e,
                            "Redis unreachable at startup, falling back to in-memory store"
                        );
                        record_store_degraded("factory");
                        Ok(self.create_in_memory(config.max_capacity))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub fn create_in_memory(&self, max_capacity: u64) -> Arc<dyn CacheStore> {
        Arc::new(InMemoryCacheStore::with_config(
            InMemoryStoreConfig::default().with_max_capacity(max_capacity),
        ))
    }
}
