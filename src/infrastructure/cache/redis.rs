//! Redis cache store implementation

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};

use crate::domain::cache::{CacheStore, CounterSnapshot};
use crate::domain::DomainError;

/// INCR plus PEXPIRE on first increment, answered with the remaining PTTL.
///
/// A counter found without an expiry is re-armed, so a crash between the
/// two commands on another client can never leave a permanent counter.
const INCREMENT_AND_EXPIRE_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
    /// Bound on establishing the connection
    pub connection_timeout: Duration,
    /// Bound on each command round trip
    pub operation_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: None,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_millis(500),
        }
    }
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    fn prefix_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn strip_prefix(&self, key: String) -> String {
        match &self.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::to_string)
                .unwrap_or(key),
            None => key,
        }
    }
}

/// Redis-backed [`CacheStore`] shared by every gateway instance.
///
/// Every command is bounded by `operation_timeout`; connection errors and
/// timeouts surface as [`DomainError::StoreUnavailable`].
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    increment_script: Script,
}

impl fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCacheStore {
    /// Connects to Redis, failing if the server is unreachable within the timeout
    pub async fn new(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            DomainError::configuration(format!("Invalid Redis URL '{}': {}", config.url, e))
        })?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| DomainError::store_unavailable("Timed out connecting to Redis"))?
        .map_err(|e| DomainError::store_unavailable(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            config,
            increment_script: Script::new(INCREMENT_AND_EXPIRE_SCRIPT),
        })
    }

    pub async fn with_url(url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(RedisStoreConfig::new(url)).await
    }

    /// Runs one Redis round trip under the operation timeout
    async fn run<T, F>(&self, op: &str, key: &str, fut: F) -> Result<T, DomainError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DomainError::store_unavailable(format!(
                "Redis {} failed for '{}': {}",
                op, key, e
            ))),
            Err(_) => Err(DomainError::store_unavailable(format!(
                "Redis {} timed out for '{}'",
                op, key
            ))),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        self.run("GET", key, conn.get(&prefixed_key)).await
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        self.run("PSETEX", key, conn.pset_ex(&prefixed_key, value, ttl_millis(ttl)))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let deleted: i64 = self.run("DEL", key, conn.del(&prefixed_key)).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        self.run("EXISTS", key, conn.exists(&prefixed_key)).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        let prefixed_pattern = self.config.prefix_key(pattern);
        let mut conn = self.connection.clone();

        // SCAN instead of KEYS so large keyspaces don't block the server
        let mut cursor = 0u64;
        let mut found = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .run(
                    "SCAN",
                    pattern,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&prefixed_pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;

            found.extend(keys.into_iter().map(|k| self.config.strip_prefix(k)));
            cursor = next_cursor;

            if cursor == 0 {
                break;
            }
        }

        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, DomainError> {
        let keys: Vec<String> = self
            .keys_matching(pattern)
            .await?
            .iter()
            .map(|k| self.config.prefix_key(k))
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection.clone();
        let deleted: i64 = self.run("DEL", pattern, conn.del(&keys)).await?;
        Ok(deleted.max(0) as usize)
    }

    async fn increment_and_expire(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<CounterSnapshot, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let mut invocation = self.increment_script.key(&prefixed_key);
        invocation.arg(ttl_millis(window));

        let (count, ttl_ms): (i64, i64) = self
            .run("EVALSHA", key, invocation.invoke_async(&mut conn))
            .await?;

        Ok(CounterSnapshot {
            count: count.max(0) as u64,
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), DomainError> {
        if members.is_empty() {
            return Ok(());
        }

        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        self.run(
            "SADD",
            key,
            redis::pipe()
                .atomic()
                .sadd(&prefixed_key, members)
                .ignore()
                .pexpire(&prefixed_key, ttl_millis(ttl) as i64)
                .ignore()
                .query_async(&mut conn),
        )
        .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let mut members: Vec<String> =
            self.run("SMEMBERS", key, conn.smembers(&prefixed_key)).await?;
        members.sort();
        Ok(members)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize, DomainError> {
        if members.is_empty() {
            return Ok(0);
        }

        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let removed: i64 = self.run("SREM", key, conn.srem(&prefixed_key, members)).await?;
        Ok(removed.max(0) as usize)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        let prefixed_key = self.config.prefix_key(key);
        let mut conn = self.connection.clone();

        let ttl_ms: i64 = self.run("PTTL", key, conn.pttl(&prefixed_key)).await?;

        // -2 if the key doesn't exist, -1 if it has no expiry
        if ttl_ms < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(ttl_ms as u64)))
        }
    }

    async fn ping(&self) -> Result<(), DomainError> {
        let mut conn = self.connection.clone();

        let _: String = self
            .run("PING", "-", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CacheStoreExt;

    fn get_test_config() -> RedisStoreConfig {
        RedisStoreConfig::new("redis://127.0.0.1:6379").with_key_prefix("gateway-test")
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_set_and_get() {
        let store = RedisCacheStore::new(get_test_config()).await.unwrap();

        store
            .set("key1", &"value1", Duration::from_secs(60))
            .await
            .unwrap();

        let result: Option<String> = store.get("key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));

        store.delete("key1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_increment_and_expire() {
        let store = RedisCacheStore::new(get_test_config()).await.unwrap();
        store.delete("rl:test").await.unwrap();

        let first = store
            .increment_and_expire("rl:test", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(first.count, 1);
        assert!(first.ttl <= Duration::from_secs(60));

        let second = store
            .increment_and_expire("rl:test", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second.count, 2);
        assert!(second.ttl <= first.ttl);

        store.delete("rl:test").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_sets_and_patterns() {
        let store = RedisCacheStore::new(get_test_config()).await.unwrap();
        let members = vec!["http:GET:/a".to_string(), "http:GET:/b".to_string()];

        store
            .set_add("tag:t1", &members, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.set_members("tag:t1").await.unwrap(), members);

        let keys = store.keys_matching("tag:*").await.unwrap();
        assert!(keys.contains(&"tag:t1".to_string()));

        assert_eq!(store.delete_pattern("tag:t1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_store_unavailable() {
        let config = RedisStoreConfig::new("redis://127.0.0.1:1")
            .with_connection_timeout(Duration::from_millis(200));

        let err = RedisCacheStore::new(config).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_key_prefix() {
        let config = RedisStoreConfig::new("redis://localhost").with_key_prefix("gw");

        assert_eq!(config.prefix_key("http:GET:/a"), "gw:http:GET:/a");
        assert_eq!(config.strip_prefix("gw:http:GET:/a".to_string()), "http:GET:/a");
        assert_eq!(
            RedisStoreConfig::default().prefix_key("plain"),
            "plain"
        );
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let err = rt
            .block_on(RedisCacheStore::new(RedisStoreConfig::new("not a url")))
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration { .. }));
    }
}
