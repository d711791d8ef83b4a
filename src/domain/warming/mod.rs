//! Cache warming domain - warm targets and run reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One request to replay against the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmRequest {
    /// Path and optional query, e.g. `/api/trending?limit=10`
    pub path: String,
    /// `Accept` header to send, so the warmed variant matches real clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
}

impl WarmRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            accept: None,
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// A warm target that did not produce a 200
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmFailure {
    pub path: String,
    pub reason: String,
}

/// Summary of one warming pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<WarmFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl WarmingReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
