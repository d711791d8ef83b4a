//! Cache domain - store abstraction, entries, validators and route policies

mod entry;
mod etag;
mod key;
mod policy;
mod store;

pub use entry::{CacheEntry, Freshness};
pub use etag::EtagCodec;
pub use key::{
    negotiated_language, negotiated_media_type, normalize_path, normalize_query, short_digest,
    CacheKeyGenerator, CacheKeyParams, DefaultKeyGenerator, RequestVariant, DEFAULT_MEDIA_TYPE,
    RESPONSE_NAMESPACE,
};
pub use policy::{
    CachePolicyTable, ClassLifetime, RouteClass, RoutePolicy, RouteRule, NO_STORE_DIRECTIVE,
};
pub use store::{glob_to_regex, CacheStore, CacheStoreExt, CounterSnapshot};

#[cfg(test)]
pub use store::mock::UnavailableStore;
