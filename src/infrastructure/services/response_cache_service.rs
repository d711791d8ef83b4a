//! HTTP response caching service behind the conditional request gate

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::cache::{
    normalize_path, CacheEntry, CacheKeyGenerator, CacheKeyParams, CachePolicyTable, CacheStore,
    CacheStoreExt, DefaultKeyGenerator, Freshness, RequestVariant, RoutePolicy,
    DEFAULT_MEDIA_TYPE, RESPONSE_NAMESPACE,
};
use crate::domain::DomainError;
use crate::infrastructure::cache::InvalidationIndex;
use crate::infrastructure::observability::record_store_degraded;

use super::single_flight::{FlightRole, SingleFlight};

/// Invalidation tags a handler attaches to its response as an extension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheTags(pub Vec<String>);

impl CacheTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }
}

/// Request extension that makes the gate skip lookup and refetch.
///
/// Only set internally (cache warming); clients cannot inject extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceRefresh;

/// Configuration for response caching
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    /// Largest body the gate stores; bigger responses are served uncached
    pub max_body_bytes: usize,
    /// Lifetime of tag sets in the invalidation index
    pub tag_ttl: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 8 * 1024 * 1024,
            tag_ttl: Duration::from_secs(86_400 * 2),
        }
    }
}

/// A handler response after buffering, shared by every coalesced waiter
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The entry written to the store, for 200 responses
    pub entry: Option<CacheEntry>,
}

impl BufferedResponse {
    pub fn etag(&self) -> Option<&str> {
        self.entry.as_ref().map(CacheEntry::etag)
    }

    /// Rebuilds a response carrying the buffered status, headers and body
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Stores, looks up and coalesces cacheable GET representations
#[derive(Debug, Clone)]
pub struct ResponseCacheService {
    store: Arc<dyn CacheStore>,
    invalidation: InvalidationIndex,
    policies: Arc<CachePolicyTable>,
    key_generator: DefaultKeyGenerator,
    flights: SingleFlight<BufferedResponse>,
    config: ResponseCacheConfig,
}

impl ResponseCacheService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        invalidation: InvalidationIndex,
        policies: Arc<CachePolicyTable>,
        config: ResponseCacheConfig,
    ) -> Self {
        Self {
            store,
            invalidation,
            policies,
            key_generator: DefaultKeyGenerator::new(),
            flights: SingleFlight::new(),
            config,
        }
    }

    pub fn policy_for(&self, path: &str) -> RoutePolicy {
        self.policies.classify(path)
    }

    pub fn invalidation(&self) -> &InvalidationIndex {
        &self.invalidation
    }

    /// Cache key of the GET representation for a request variant
    pub fn key_for(&self, path: &str, variant: &RequestVariant<'_>) -> String {
        let params = CacheKeyParams::for_request("GET", path, variant);
        self.key_generator
            .generate_with_namespace(RESPONSE_NAMESPACE, &params)
    }

    /// Tag carried by every stored variant of a path
    pub fn path_tag(path: &str) -> String {
        format!("path:{}", normalize_path(path))
    }

    /// Loads an entry that is still fresh or stale; expired and unreadable
    /// entries are a miss
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let loaded: Result<Option<CacheEntry>, DomainError> = self.store.get(key).await;

        match loaded {
            Ok(Some(entry)) if entry.freshness() != Freshness::Expired => Some(entry),
            Ok(_) => None,
            Err(e) if e.is_store_unavailable() => {
                warn!(degraded = true, key = %key, error = %e, "Cache store unavailable on lookup");
                record_store_degraded("cache_lookup");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    /// Writes an entry and registers its tags; failures only degrade caching
    pub async fn persist(&self, entry: &CacheEntry) {
        if let Err(e) = self.store.set(entry.key(), entry, entry.storage_ttl()).await {
            warn!(degraded = true, key = %entry.key(), error = %e, "Failed to store cache entry");
            record_store_degraded("cache_persist");
            return;
        }

        let tags: Vec<String> = entry.tags().iter().cloned().collect();
        if let Err(e) = self.invalidation.tag(entry.key(), &tags).await {
            warn!(degraded = true, key = %entry.key(), error = %e, "Failed to register cache tags");
            record_store_degraded("cache_tags");
        }

        debug!(key = %entry.key(), etag = %entry.etag(), "Stored response");
    }

    /// Buffers a handler response and stores it when it is a cacheable 200
    /// within `max_body_bytes`
    pub async fn capture(
        &self,
        key: &str,
        path: &str,
        policy: &RoutePolicy,
        response: Response,
    ) -> Result<BufferedResponse, DomainError> {
        let (mut parts, body) = response.into_parts();

        // Upstream bodies arrive fully buffered; the cap only bounds what is stored
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| DomainError::internal(format!("Failed to buffer response: {}", e)))?;

        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::TRANSFER_ENCODING);

        let storable = body.len() <= self.config.max_body_bytes;
        if !storable {
            debug!(
                key = %key,
                bytes = body.len(),
                limit = self.config.max_body_bytes,
                "Response too large to cache"
            );
        }

        let entry = if parts.status == StatusCode::OK && policy.is_cacheable() && storable {
            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(DEFAULT_MEDIA_TYPE)
                .to_string();

            let mut tags = parts
                .extensions
                .get::<CacheTags>()
                .cloned()
                .unwrap_or_default()
                .0;
            tags.push(Self::path_tag(path));

            let entry = CacheEntry::new(key, body.clone(), content_type)
                .with_ttl(policy.lifetime.ttl_seconds, policy.lifetime.stale_seconds)
                .with_cache_control(policy.cache_control())
                .with_tags(tags);

            self.persist(&entry).await;
            Some(entry)
        } else {
            None
        };

        Ok(BufferedResponse {
            status: parts.status,
            headers: parts.headers,
            body,
            entry,
        })
    }

    /// Runs `fut` once per key across concurrent callers
    pub async fn coalesce<F>(
        &self,
        key: &str,
        fut: F,
    ) -> (Result<BufferedResponse, DomainError>, FlightRole)
    where
        F: Future<Output = Result<BufferedResponse, DomainError>> + Send + 'static,
    {
        self.flights.run(key, fut).await
    }

    /// Drops every stored variant of a path, returning how many were removed
    pub async fn invalidate_path(&self, path: &str) -> usize {
        let tag = Self::path_tag(path);

        match self.invalidation.purge(&tag).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(degraded = true, tag = %tag, error = %e, "Failed to invalidate path");
                record_store_degraded("cache_invalidate");
                0
            }
        }
    }
}
