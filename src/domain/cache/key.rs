//! Cache key generation for HTTP representations

use std::collections::BTreeMap;
use std::fmt::Debug;

use sha2::{Digest, Sha256};

/// Namespace for stored HTTP representations
pub const RESPONSE_NAMESPACE: &str = "http";

/// Media type assumed when the client does not negotiate one
pub const DEFAULT_MEDIA_TYPE: &str = "application/json";

/// Trait for generating cache keys from key parameters
pub trait CacheKeyGenerator: Send + Sync + Debug {
    /// Generates a cache key from the given components
    fn generate(&self, params: &CacheKeyParams) -> String;

    /// Generates a key with a namespace prefix
    fn generate_with_namespace(&self, namespace: &str, params: &CacheKeyParams) -> String {
        format!("{}:{}", namespace, self.generate(params))
    }
}

/// Parameters for cache key generation
#[derive(Debug, Clone, Default)]
pub struct CacheKeyParams {
    /// Primary identifier (method and normalized path)
    pub primary: String,
    /// Variance dimensions (sorted for consistency)
    pub components: BTreeMap<String, String>,
}

impl CacheKeyParams {
    /// Creates new cache key parameters with a primary identifier
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            components: BTreeMap::new(),
        }
    }

    /// Adds a component to the key parameters
    pub fn with_component(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.components.insert(key.into(), value.into());
        self
    }

    /// Adds a component whose value is hashed before it lands in the key
    pub fn with_hashed_component(self, key: impl Into<String>, value: &str) -> Self {
        self.with_component(key, short_digest(value))
    }

    /// Builds key parameters for a request representation.
    ///
    /// Every request header forwarded upstream that can change the body
    /// must appear in `variant`.
    pub fn for_request(method: &str, path: &str, variant: &RequestVariant<'_>) -> Self {
        let mut primary = format!("{}:{}", method.to_uppercase(), normalize_path(path));

        if let Some(query) = variant.query.map(normalize_query).filter(|q| !q.is_empty()) {
            primary.push('?');
            primary.push_str(&query);
        }

        let mut params =
            Self::new(primary).with_component("accept", negotiated_media_type(variant.accept));

        if let Some(language) = negotiated_language(variant.accept_language) {
            params = params.with_component("lang", language);
        }

        match variant.identity {
            Some(identity) => params.with_hashed_component("identity", identity),
            None => params,
        }
    }
}

/// Request dimensions a stored representation varies on
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestVariant<'a> {
    pub query: Option<&'a str>,
    pub accept: Option<&'a str>,
    pub accept_language: Option<&'a str>,
    /// Caller identity; only set for personalized routes
    pub identity: Option<&'a str>,
}

impl<'a> RequestVariant<'a> {
    pub fn with_accept(mut self, accept: &'a str) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn with_language(mut self, accept_language: &'a str) -> Self {
        self.accept_language = Some(accept_language);
        self
    }
}

/// Default cache key generator producing readable, pattern-matchable keys
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyGenerator {
    /// Whether to replace the whole key with a digest
    use_short_hash: bool,
}

impl DefaultKeyGenerator {
    /// Creates a new default key generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that produces digest keys
    pub fn with_short_hash(mut self) -> Self {
        self.use_short_hash = true;
        self
    }
}

impl CacheKeyGenerator for DefaultKeyGenerator {
    fn generate(&self, params: &CacheKeyParams) -> String {
        let mut parts = vec![params.primary.clone()];

        for (k, v) in &params.components {
            parts.push(format!("{}={}", k, v));
        }

        let combined = parts.join(":");

        if self.use_short_hash {
            short_digest(&combined)
        } else {
            combined
        }
    }
}

/// SHA-256 based digest, stable across processes and builds
pub fn short_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Collapses duplicate slashes and strips the trailing slash
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Sorts query pairs so `?b=2&a=1` and `?a=1&b=2` share a key
pub fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

/// First language range of an `Accept-Language` header, `None` for absent or `*`
pub fn negotiated_language(accept_language: Option<&str>) -> Option<String> {
    accept_language
        .and_then(|value| value.split(',').next())
        .map(|range| range.split(';').next().unwrap_or("").trim().to_lowercase())
        .filter(|range| !range.is_empty() && range != "*")
}

/// First media range of an `Accept` header, parameters stripped
pub fn negotiated_media_type(accept: Option<&str>) -> String {
    accept
        .and_then(|value| value.split(',').next())
        .map(|range| range.split(';').next().unwrap_or("").trim().to_lowercase())
        .filter(|range| !range.is_empty() && range != "*/*")
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string())
}
