//! Cache store trait definition

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::DomainError;

/// Result of an atomic increment on a windowed counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Value after the increment
    pub count: u64,
    /// Time until the counter window expires
    pub ttl: Duration,
}

/// Shared key/value store with TTLs, atomic counters, and tag sets
///
/// Values are JSON strings so the trait stays dyn-compatible; use
/// [`CacheStoreExt`] for typed access. Connectivity problems surface as
/// [`DomainError::StoreUnavailable`], never as panics.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Gets a raw JSON value from the store
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Sets a raw JSON value with a TTL
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError>;

    /// Deletes a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get_raw(key).await?.is_some())
    }

    /// Lists keys matching a glob pattern (`*` wildcard)
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, DomainError>;

    /// Deletes keys matching a glob pattern, returning how many were removed
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, DomainError> {
        let keys = self.keys_matching(pattern).await?;
        let mut deleted = 0;

        for key in keys {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Increments a counter and arms its expiry window in one atomic step.
    ///
    /// The window is armed only when the counter is created, so a window never
    /// slides forward under steady traffic.
    async fn increment_and_expire(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<CounterSnapshot, DomainError>;

    /// Adds members to a set and refreshes the set's TTL
    async fn set_add(&self, key: &str, members: &[String], ttl: Duration)
    -> Result<(), DomainError>;

    /// Returns the members of a set (empty if missing)
    async fn set_members(&self, key: &str) -> Result<Vec<String>, DomainError>;

    /// Removes members from a set, returning how many were removed
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize, DomainError>;

    /// Gets the remaining TTL for a key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError>;

    /// Verifies the backend is reachable
    async fn ping(&self) -> Result<(), DomainError>;

    /// Name of the backend, for logs and health checks
    fn backend_name(&self) -> &'static str;
}

/// Extension trait providing typed get/set operations
pub trait CacheStoreExt: CacheStore {
    /// Gets a typed value from the store
    fn get<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_raw(key).await? {
                Some(data) => {
                    let value: V = serde_json::from_str(&data).map_err(|e| {
                        DomainError::internal(format!("Failed to deserialize cache value: {}", e))
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    /// Sets a typed value with a TTL
    fn set<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let data = serde_json::to_string(value).map_err(|e| {
                DomainError::internal(format!("Failed to serialize cache value: {}", e))
            })?;
            self.set_raw(key, &data, ttl).await
        }
    }
}

// Blanket implementation for all types implementing CacheStore
impl<T: CacheStore + ?Sized> CacheStoreExt for T {}

/// Converts a glob pattern (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<regex::Regex, DomainError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');

    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }

    expr.push('$');

    regex::Regex::new(&expr)
        .map_err(|e| DomainError::validation(format!("Invalid pattern '{}': {}", pattern, e)))
}
