//! Cache infrastructure - store implementations and the invalidation index

mod factory;
mod in_memory;
mod invalidation;
mod redis;

pub use factory::{CacheStoreFactory, StoreConfig, StoreType};
pub use in_memory::{InMemoryCacheStore, InMemoryStoreConfig};
pub use invalidation::{InvalidationIndex, TAG_NAMESPACE};
pub use redis::{RedisCacheStore, RedisStoreConfig};
