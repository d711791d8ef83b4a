//! Route classification into caching policies

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Directive sent for routes that must never be stored
pub const NO_STORE_DIRECTIVE: &str = "no-store, no-cache, must-revalidate, private";

/// Caching class of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    /// Auth and admin traffic
    NoStore,
    /// Search and trending listings
    Short,
    /// Article detail pages
    Medium,
    /// Fingerprinted static assets
    Immutable,
    /// Everything else
    Default,
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStore => write!(f, "no_store"),
            Self::Short => write!(f, "short"),
            Self::Medium => write!(f, "medium"),
            Self::Immutable => write!(f, "immutable"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl FromStr for RouteClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "no_store" | "no-store" | "nostore" => Ok(Self::NoStore),
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "immutable" | "long" => Ok(Self::Immutable),
            "default" => Ok(Self::Default),
            _ => Err(DomainError::configuration(format!(
                "Unknown route class: {}. Valid classes: no_store, short, medium, immutable, default",
                s
            ))),
        }
    }
}

/// Freshness lifetime of a route class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLifetime {
    pub ttl_seconds: u64,
    pub stale_seconds: u64,
}

impl ClassLifetime {
    pub const fn new(ttl_seconds: u64, stale_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            stale_seconds,
        }
    }
}

impl RouteClass {
    pub fn default_lifetime(self) -> ClassLifetime {
        match self {
            Self::NoStore => ClassLifetime::new(0, 0),
            Self::Short => ClassLifetime::new(300, 600),
            Self::Medium => ClassLifetime::new(1800, 3600),
            Self::Immutable => ClassLifetime::new(86_400, 0),
            Self::Default => ClassLifetime::new(600, 1200),
        }
    }

    /// Whether the gate itself serves stale entries for this class by default
    pub fn serves_stale_by_default(self) -> bool {
        matches!(self, Self::Short)
    }
}

/// Effective policy for one request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub class: RouteClass,
    pub lifetime: ClassLifetime,
    /// Serve stale entries while refreshing in the background
    pub serve_stale: bool,
    /// Vary the cache key by caller identity
    pub personalized: bool,
}

impl RoutePolicy {
    pub fn is_cacheable(&self) -> bool {
        self.class != RouteClass::NoStore && self.lifetime.ttl_seconds > 0
    }

    /// `Cache-Control` value advertised to clients
    pub fn cache_control(&self) -> String {
        if !self.is_cacheable() {
            return NO_STORE_DIRECTIVE.to_string();
        }

        let scope = if self.personalized { "private" } else { "public" };

        match self.class {
            RouteClass::Immutable => {
                format!("{}, max-age={}, immutable", scope, self.lifetime.ttl_seconds)
            }
            _ if self.lifetime.stale_seconds > 0 => format!(
                "{}, max-age={}, stale-while-revalidate={}",
                scope, self.lifetime.ttl_seconds, self.lifetime.stale_seconds
            ),
            _ => format!("{}, max-age={}", scope, self.lifetime.ttl_seconds),
        }
    }
}

/// A URL pattern mapped to a route class
#[derive(Debug, Clone)]
pub struct RouteRule {
    pattern: Regex,
    class: RouteClass,
    serve_stale: Option<bool>,
    personalized: bool,
}

impl RouteRule {
    pub fn new(pattern: &str, class: RouteClass) -> Result<Self, DomainError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            DomainError::configuration(format!("Invalid route pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            pattern,
            class,
            serve_stale: None,
            personalized: false,
        })
    }

    pub fn with_serve_stale(mut self, serve_stale: bool) -> Self {
        self.serve_stale = Some(serve_stale);
        self
    }

    pub fn personalized(mut self) -> Self {
        self.personalized = true;
        self
    }
}

/// Static table mapping URL patterns to caching policies; first match wins
#[derive(Debug, Clone)]
pub struct CachePolicyTable {
    rules: Vec<RouteRule>,
    lifetimes: HashMap<RouteClass, ClassLifetime>,
}

impl Default for CachePolicyTable {
    fn default() -> Self {
        let defaults = [
            (r"^/admin(/|$)", RouteClass::NoStore),
            (r"^/auth(/|$)", RouteClass::NoStore),
            (r"^/api/(search|trending)(/|$)", RouteClass::Short),
            (r"^/api/articles/[^/]+$", RouteClass::Medium),
            (r"^/static/", RouteClass::Immutable),
            (
                r"\.(css|js|mjs|png|jpe?g|gif|svg|webp|ico|woff2?)$",
                RouteClass::Immutable,
            ),
        ];

        let rules = defaults
            .iter()
            .filter_map(|(pattern, class)| RouteRule::new(pattern, *class).ok())
            .collect();

        Self {
            rules,
            lifetimes: HashMap::new(),
        }
    }
}

impl CachePolicyTable {
    /// Table with no rules: every path gets the default class
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            lifetimes: HashMap::new(),
        }
    }

    /// Adds a rule ahead of the existing ones
    pub fn with_override(mut self, rule: RouteRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Overrides the lifetime of a route class
    pub fn with_lifetime(mut self, class: RouteClass, lifetime: ClassLifetime) -> Self {
        self.lifetimes.insert(class, lifetime);
        self
    }

    pub fn lifetime(&self, class: RouteClass) -> ClassLifetime {
        self.lifetimes
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_lifetime())
    }

    /// Resolves the policy for a request path
    pub fn classify(&self, path: &str) -> RoutePolicy {
        let rule = self.rules.iter().find(|rule| rule.pattern.is_match(path));

        let class = rule.map(|r| r.class).unwrap_or(RouteClass::Default);
        let serve_stale = rule
            .and_then(|r| r.serve_stale)
            .unwrap_or_else(|| class.serves_stale_by_default());

        RoutePolicy {
            class,
            lifetime: self.lifetime(class),
            serve_stale,
            personalized: rule.map(|r| r.personalized).unwrap_or(false),
        }
    }
}
