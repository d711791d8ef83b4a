//! Infrastructure services

mod cache_warmer;
mod response_cache_service;
mod single_flight;

pub use cache_warmer::{CacheWarmer, CacheWarmerConfig, RequestDispatcher, WARMER_IDENTITY};
pub use response_cache_service::{
    BufferedResponse, CacheTags, ForceRefresh, ResponseCacheConfig, ResponseCacheService,
};
pub use single_flight::{FlightRole, SingleFlight};
