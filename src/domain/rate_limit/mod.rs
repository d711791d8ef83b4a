//! Rate limiting domain - endpoint classes, rules, client identity and decisions

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Endpoint class, each with its own limit, window and key namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    General,
    Auth,
    Admin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Admin => "admin",
        }
    }

    /// Classifies a request path
    pub fn for_path(path: &str) -> Self {
        if path == "/admin" || path.starts_with("/admin/") {
            Self::Admin
        } else if path == "/auth" || path.starts_with("/auth/") {
            Self::Auth
        } else {
            Self::General
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "auth" => Ok(Self::Auth),
            "admin" => Ok(Self::Admin),
            _ => Err(DomainError::configuration(format!(
                "Unknown endpoint class: {}. Valid classes: general, auth, admin",
                s
            ))),
        }
    }
}

/// Requests allowed per fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn default_for(class: EndpointClass) -> Self {
        match class {
            EndpointClass::General => Self::new(100, Duration::from_secs(60)),
            EndpointClass::Auth => Self::new(5, Duration::from_secs(300)),
            EndpointClass::Admin => Self::new(30, Duration::from_secs(60)),
        }
    }
}

/// Who a request is counted against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Authenticated user id, as asserted by the auth layer
    User(String),
    /// Client network address
    Ip(String),
    /// No usable identity; all such callers share one bucket
    Unknown,
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Ip(addr) => write!(f, "ip:{}", addr),
            Self::Unknown => write!(f, "ip:unknown"),
        }
    }
}

/// Outcome of one rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window resets
    pub reset_after: Duration,
    /// Suggested wait before retrying, set when rejected
    pub retry_after: Option<Duration>,
    /// True when the store was unreachable and the request was let through
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Fail-open decision used when the counter store is unavailable
    pub fn degraded(rule: RateLimitRule) -> Self {
        Self {
            allowed: true,
            limit: rule.limit,
            remaining: rule.limit,
            reset_after: rule.window,
            retry_after: None,
            degraded: true,
        }
    }

    /// Whole seconds until the window resets, rounded up
    pub fn reset_seconds(&self) -> u64 {
        ceil_seconds(self.reset_after)
    }
}

/// Rounds a duration up to whole seconds
pub fn ceil_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
