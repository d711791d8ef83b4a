//! In-memory cache store using moka

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::cache::{glob_to_regex, CacheStore, CounterSnapshot};
use crate::domain::DomainError;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryStoreConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Hard upper bound on how long moka keeps any entry
    pub max_ttl: Duration,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            max_ttl: Duration::from_secs(86_400 * 2),
        }
    }
}

impl InMemoryStoreConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Counter(u64),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    /// Expiry on the tokio clock, so paused-time tests can drive it
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local [`CacheStore`] for single-instance deployments and tests.
///
/// Expiry is checked lazily on read. Counter and set mutations are
/// serialized by an async mutex so read-modify-write stays atomic.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    cache: MokaCache<String, StoredEntry>,
    write_lock: Mutex<()>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::with_config(InMemoryStoreConfig::default())
    }

    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.max_ttl)
            .build();

        Self {
            cache,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the live entry for a key, reaping it when expired
    async fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        let entry = self.cache.get(key).await?;

        if entry.is_expired(Instant::now()) {
            self.cache.remove(key).await;
            return None;
        }

        Some(entry)
    }

    fn wrong_type(key: &str) -> DomainError {
        DomainError::validation(format!("Key '{}' holds a value of another type", key))
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        match self.live_entry(key).await {
            Some(StoredEntry {
                value: StoredValue::Text(data),
                ..
            }) => Ok(Some(data)),
            Some(StoredEntry {
                value: StoredValue::Counter(count),
                ..
            }) => Ok(Some(count.to_string())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        let entry = StoredEntry {
            value: StoredValue::Text(value.to_string()),
            expires_at: Instant::now() + ttl,
        };

        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let existed = self.live_entry(key).await.is_some();
        self.cache.remove(key).await;
        Ok(existed)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, DomainError> {
        let regex = glob_to_regex(pattern)?;
        let now = Instant::now();

        self.cache.run_pending_tasks().await;

        let mut keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && regex.is_match(key.as_str()))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        keys.sort();
        Ok(keys)
    }

    async fn increment_and_expire(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<CounterSnapshot, DomainError> {
        let _guard = self.write_lock.lock().await;
        let now = Instant::now();

        let (count, expires_at) = match self.live_entry(key).await {
            Some(StoredEntry {
                value: StoredValue::Counter(count),
                expires_at,
            }) => (count + 1, expires_at),
            Some(_) => return Err(Self::wrong_type(key)),
            None => (1, now + window),
        };

        self.cache
            .insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Counter(count),
                    expires_at,
                },
            )
            .await;

        Ok(CounterSnapshot {
            count,
            ttl: expires_at.saturating_duration_since(now),
        })
    }

    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;

        let mut set = match self.live_entry(key).await {
            Some(StoredEntry {
                value: StoredValue::Set(set),
                ..
            }) => set,
            Some(_) => return Err(Self::wrong_type(key)),
            None => BTreeSet::new(),
        };
        set.extend(members.iter().cloned());

        self.cache
            .insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Set(set),
                    expires_at: Instant::now() + ttl,
                },
            )
            .await;

        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, DomainError> {
        match self.live_entry(key).await {
            Some(StoredEntry {
                value: StoredValue::Set(set),
                ..
            }) => Ok(set.into_iter().collect()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<usize, DomainError> {
        let _guard = self.write_lock.lock().await;

        let Some(entry) = self.live_entry(key).await else {
            return Ok(0);
        };
        let StoredValue::Set(mut set) = entry.value else {
            return Err(Self::wrong_type(key));
        };

        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();

        if set.is_empty() {
            self.cache.remove(key).await;
        } else {
            self.cache
                .insert(
                    key.to_string(),
                    StoredEntry {
                        value: StoredValue::Set(set),
                        expires_at: entry.expires_at,
                    },
                )
                .await;
        }

        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        Ok(self
            .live_entry(key)
            .await
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn ping(&self) -> Result<(), DomainError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::cache::CacheStoreExt;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryCacheStore::new();

        store
            .set("key1", &"value1", Duration::from_secs(60))
            .await
            .unwrap();

        let result: Option<String> = store.get("key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = InMemoryCacheStore::new();

        let result: Option<String> = store.get("missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryCacheStore::new();

        store
            .set("key1", &"value1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.delete("key1").await.unwrap());
        assert!(!store.delete("key1").await.unwrap());
        assert!(!store.exists("key1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let store = InMemoryCacheStore::new();

        store
            .set("key1", &"value1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.exists("key1").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;

        let result: Option<String> = store.get("key1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_remaining() {
        let store = InMemoryCacheStore::new();

        store
            .set("key1", &"value1", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        let remaining = store.ttl("key1").await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(50));
        assert!(store.ttl("missing").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_arms_window_once() {
        let store = InMemoryCacheStore::new();
        let window = Duration::from_secs(60);

        let first = store.increment_and_expire("rl:general:ip:1", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.ttl, window);

        tokio::time::advance(Duration::from_secs(20)).await;

        let second = store.increment_and_expire("rl:general:ip:1", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.ttl, Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(41)).await;

        let reset = store.increment_and_expire("rl:general:ip:1", window).await.unwrap();
        assert_eq!(reset.count, 1);
        assert_eq!(reset.ttl, window);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(InMemoryCacheStore::new());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment_and_expire("counter", Duration::from_secs(60))
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let last = store
            .increment_and_expire("counter", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(last.count, 51);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);

        store
            .set_add("tag:section:books", &["a".to_string(), "b".to_string()], ttl)
            .await
            .unwrap();
        store
            .set_add("tag:section:books", &["b".to_string(), "c".to_string()], ttl)
            .await
            .unwrap();

        let members = store.set_members("tag:section:books").await.unwrap();
        assert_eq!(members, vec!["a", "b", "c"]);

        let removed = store
            .set_remove("tag:section:books", &["a".to_string(), "z".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.set_members("tag:section:books").await.unwrap(), vec!["b", "c"]);
        assert!(store.set_members("tag:none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error() {
        let store = InMemoryCacheStore::new();

        store
            .set("plain", &"value", Duration::from_secs(60))
            .await
            .unwrap();

        let result = store
            .set_add("plain", &["x".to_string()], Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_keys_matching_and_delete_pattern() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);

        store.set("http:GET:/api/books/1", &"1", ttl).await.unwrap();
        store.set("http:GET:/api/books/2", &"2", ttl).await.unwrap();
        store.set("http:GET:/api/articles/1", &"3", ttl).await.unwrap();

        let keys = store.keys_matching("http:GET:/api/books/*").await.unwrap();
        assert_eq!(keys, vec!["http:GET:/api/books/1", "http:GET:/api/books/2"]);

        let deleted = store.delete_pattern("http:GET:/api/books/*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.exists("http:GET:/api/articles/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_complex_types() {
        let store = InMemoryCacheStore::new();

        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct TestData {
            name: String,
            values: Vec<i32>,
        }

        let data = TestData {
            name: "test".to_string(),
            values: vec![1, 2, 3],
        };

        store
            .set("complex", &data, Duration::from_secs(60))
            .await
            .unwrap();

        let result: Option<TestData> = store.get("complex").await.unwrap();
        assert_eq!(result, Some(data));
    }
}
