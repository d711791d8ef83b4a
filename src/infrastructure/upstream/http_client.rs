//! Upstream content API client using reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::domain::{DomainError, UpstreamClient, UpstreamRequest, UpstreamResponse};

/// Configuration for the upstream HTTP client
#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
    /// Breaker and log name of the upstream
    pub name: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Headers added to every request, e.g. an upstream API key
    pub default_headers: Vec<(String, String)>,
}

impl HttpUpstreamConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            default_headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

/// Real upstream client using reqwest
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    config: HttpUpstreamConfig,
}

impl HttpUpstreamClient {
    pub fn new(config: HttpUpstreamConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                DomainError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path_and_query.trim_start_matches('/')
        )
    }

    fn failure(&self, message: impl Into<String>) -> DomainError {
        DomainError::upstream(&self.config.name, message)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, DomainError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| DomainError::validation(format!("Invalid method: {}", request.method)))?;
        let url = self.url_for(&request.path_and_query);

        debug!(upstream = %self.config.name, method = %method, url = %url, "Forwarding request");

        let mut builder = self.client.request(method, &url);

        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                self.failure(format!("Request timed out after {}ms", self.config.timeout.as_millis()))
            } else {
                self.failure(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| self.failure(format!("Failed to read response body: {}", e)))?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
