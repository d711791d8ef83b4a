//! Stored HTTP representation

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::etag::EtagCodec;

/// Freshness of an entry relative to its TTL and stale window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within `ttl_seconds`
    Fresh,
    /// Past `ttl_seconds` but inside the stale window
    Stale,
    /// Logically absent, even if the store still holds it
    Expired,
}

/// A cached response payload with its validator and lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    key: String,
    etag: String,
    #[serde(with = "payload_encoding")]
    payload: Bytes,
    content_type: String,
    cache_control: String,
    stored_at: DateTime<Utc>,
    ttl_seconds: u64,
    #[serde(default)]
    stale_seconds: u64,
    #[serde(default)]
    tags: BTreeSet<String>,
}

impl CacheEntry {
    /// Creates an entry, computing its ETag from the payload
    pub fn new(key: impl Into<String>, payload: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            etag: EtagCodec::compute(&payload),
            payload,
            content_type: content_type.into(),
            cache_control: String::new(),
            stored_at: Utc::now(),
            ttl_seconds: 0,
            stale_seconds: 0,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64, stale_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self.stale_seconds = stale_seconds;
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = cache_control.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_stored_at(mut self, stored_at: DateTime<Utc>) -> Self {
        self.stored_at = stored_at;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn cache_control(&self) -> &str {
        &self.cache_control
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn stale_seconds(&self) -> u64 {
        self.stale_seconds
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// How long the store should physically keep this entry
    pub fn storage_ttl(&self) -> Duration {
        Duration::from_secs((self.ttl_seconds + self.stale_seconds).max(1))
    }

    /// Whole seconds since the entry was stored
    pub fn age_at(&self, now: DateTime<Utc>) -> u64 {
        (now - self.stored_at).num_seconds().max(0) as u64
    }

    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        let age_ms = (now - self.stored_at).num_milliseconds().max(0) as u64;
        let ttl_ms = self.ttl_seconds * 1000;
        let stale_ms = self.stale_seconds * 1000;

        if age_ms < ttl_ms {
            Freshness::Fresh
        } else if age_ms < ttl_ms + stale_ms {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Utc::now())
    }
}

mod payload_encoding {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
