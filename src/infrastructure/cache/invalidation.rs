//! Tag-based invalidation index over the shared store

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

/// Namespace for tag sets in the store
pub const TAG_NAMESPACE: &str = "tag";

/// Members checked for expiry each time a key is tagged
const WRITE_SWEEP_LIMIT: usize = 64;

/// Maps invalidation tags to the cache keys that carry them.
///
/// Each tag is a store set `tag:<tag>`. Members whose entry has expired are
/// pruned when the tag is read and, in bounded batches, when it is written.
#[derive(Debug, Clone)]
pub struct InvalidationIndex {
    store: Arc<dyn CacheStore>,
    tag_ttl: Duration,
}

impl InvalidationIndex {
    /// `tag_ttl` should outlive the longest entry lifetime so tags never
    /// vanish before the entries they point at
    pub fn new(store: Arc<dyn CacheStore>, tag_ttl: Duration) -> Self {
        Self { store, tag_ttl }
    }

    pub fn tag_key(tag: &str) -> String {
        format!("{}:{}", TAG_NAMESPACE, tag)
    }

    /// Associates a cache key with each of the given tags.
    ///
    /// Expired members are swept from each tag before the key is added, so a
    /// tag that is written often but never read stays bounded by its live
    /// entries.
    pub async fn tag(&self, key: &str, tags: &[String]) -> Result<(), DomainError> {
        let member = [key.to_string()];

        for tag in tags {
            let tag_key = Self::tag_key(tag);
            self.prune(tag, &tag_key, WRITE_SWEEP_LIMIT).await?;
            self.store.set_add(&tag_key, &member, self.tag_ttl).await?;
        }

        Ok(())
    }

    /// Removes members whose entry no longer exists, checking at most `limit`
    /// of them. Returns the members that are still live.
    async fn prune(
        &self,
        tag: &str,
        tag_key: &str,
        limit: usize,
    ) -> Result<Vec<String>, DomainError> {
        let members = self.store.set_members(tag_key).await?;

        let mut live = Vec::with_capacity(members.len());
        let mut missing = Vec::new();

        for key in members.into_iter().take(limit) {
            if self.store.exists(&key).await? {
                live.push(key);
            } else {
                missing.push(key);
            }
        }

        if !missing.is_empty() {
            debug!(tag = %tag, pruned = missing.len(), "Pruning expired keys from tag");
            self.store.set_remove(tag_key, &missing).await?;
        }

        Ok(live)
    }

    /// Live cache keys carrying the tag
    pub async fn keys_for(&self, tag: &str) -> Result<Vec<String>, DomainError> {
        self.prune(tag, &Self::tag_key(tag), usize::MAX).await
    }

    /// Deletes every entry carrying the tag, then the tag itself.
    ///
    /// Returns how many entries were removed.
    pub async fn purge(&self, tag: &str) -> Result<usize, DomainError> {
        let tag_key = Self::tag_key(tag);
        let members = self.store.set_members(&tag_key).await?;

        let mut purged = 0;
        for key in &members {
            if self.store.delete(key).await? {
                purged += 1;
            }
        }

        self.store.delete(&tag_key).await?;

        info!(tag = %tag, purged, "Purged cache entries by tag");
        Ok(purged)
    }

    /// Drops the tag mapping, leaving the entries in place
    pub async fn remove_tag(&self, tag: &str) -> Result<bool, DomainError> {
        self.store.delete(&Self::tag_key(tag)).await
    }
}
