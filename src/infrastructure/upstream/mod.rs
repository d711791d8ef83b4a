//! Upstream infrastructure - HTTP client for the content API

mod http_client;

pub use http_client::{HttpUpstreamClient, HttpUpstreamConfig};
