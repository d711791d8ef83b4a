//! Circuit breaker domain - states, configuration and status snapshots

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through, failures are counted
    Closed,
    /// Calls fail fast without touching the dependency
    Open,
    /// A single probe call is allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration shared by every breaker in a registry
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown after the first trip
    pub cooldown: Duration,
    /// Upper bound for the backed-off cooldown
    pub max_cooldown: Duration,
    /// Growth factor applied per consecutive open cycle
    pub backoff_multiplier: f64,
    /// Random extra cooldown, as a fraction of the computed cooldown
    pub jitter_ratio: f64,
    /// Bound on each protected call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }

    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Cooldown for the given open cycle (1-indexed), before jitter
    pub fn cooldown_for_cycle(&self, cycle: u32) -> Duration {
        let exponent = cycle.saturating_sub(1).min(32) as i32;
        let cooldown_ms =
            self.cooldown.as_millis() as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = cooldown_ms.min(self.max_cooldown.as_millis() as f64);

        Duration::from_millis(capped.max(self.cooldown.as_millis() as f64) as u64)
    }
}

/// Read-only snapshot of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    pub open_cycles: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}
