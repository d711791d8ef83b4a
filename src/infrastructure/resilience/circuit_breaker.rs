//! Circuit breakers guarding upstream dependencies

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::domain::{CircuitBreakerConfig, CircuitState, CircuitStatus, DomainError};
use crate::infrastructure::observability::{record_breaker_rejection, record_breaker_transition};

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    cooldown_until: Option<Instant>,
    open_cycles: u32,
    probe_in_flight: bool,
    /// Bumped by manual resets and opens; outcomes admitted earlier are ignored
    epoch: u64,
}

impl BreakerState {
    fn closed(epoch: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            cooldown_until: None,
            open_cycles: 0,
            probe_in_flight: false,
            epoch,
        }
    }
}

/// What a call was admitted as, and under which epoch
#[derive(Debug, Clone, Copy)]
struct Ticket {
    probe: bool,
    epoch: u64,
}

enum Admission {
    Allowed(Ticket),
    Rejected { retry_after: Duration },
}

/// Breaker for a single named dependency.
///
/// State lives behind a std mutex that is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::closed(0)),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `op` if the circuit admits it, bounded by `call_timeout`
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let ticket = match self.admit() {
            Admission::Allowed(ticket) => ticket,
            Admission::Rejected { retry_after } => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                record_breaker_rejection(&self.name);
                debug!(breaker = %self.name, "Circuit open, rejecting call");
                return Err(DomainError::circuit_open(&self.name, retry_after));
            }
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut guard = ProbeGuard {
            breaker: self,
            ticket,
            armed: ticket.probe,
        };

        let result = match timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::upstream(
                &self.name,
                format!(
                    "Call timed out after {}ms",
                    self.config.call_timeout.as_millis()
                ),
            )),
        };

        guard.armed = false;

        match &result {
            Err(e) if e.is_dependency_failure() => self.record_failure(ticket, e),
            _ => self.record_success(ticket),
        }

        result
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        let now = Instant::now();
        let epoch = inner.epoch;

        match inner.state {
            CircuitState::Closed => Admission::Allowed(Ticket {
                probe: false,
                epoch,
            }),
            CircuitState::Open => {
                let until = inner.cooldown_until.unwrap_or(now);

                if now >= until {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Admission::Allowed(Ticket { probe: true, epoch })
                } else {
                    Admission::Rejected {
                        retry_after: until - now,
                    }
                }
            }
            CircuitState::HalfOpen if inner.probe_in_flight => Admission::Rejected {
                retry_after: self.config.call_timeout,
            },
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Admission::Allowed(Ticket { probe: true, epoch })
            }
        }
    }

    fn record_success(&self, ticket: Ticket) {
        let mut inner = self.lock();

        if ticket.epoch != inner.epoch {
            debug!(breaker = %self.name, "Ignoring outcome from before a manual override");
            return;
        }

        if ticket.probe {
            inner.probe_in_flight = false;
            inner.consecutive_failures = 0;
            inner.open_cycles = 0;
            inner.cooldown_until = None;
            self.transition(&mut inner, CircuitState::Closed);
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, ticket: Ticket, error: &DomainError) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        if ticket.epoch != inner.epoch {
            debug!(breaker = %self.name, "Ignoring outcome from before a manual override");
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());

        if ticket.probe {
            inner.probe_in_flight = false;
            warn!(breaker = %self.name, error = %error, "Probe call failed, reopening circuit");
            self.trip(&mut inner);
        } else if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                error = %error,
                "Failure threshold reached, opening circuit"
            );
            self.trip(&mut inner);
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.open_cycles = inner.open_cycles.saturating_add(1);
        let cooldown = self.jittered_cooldown(inner.open_cycles);
        inner.cooldown_until = Some(Instant::now() + cooldown);
        self.transition(inner, CircuitState::Open);

        info!(
            breaker = %self.name,
            cycle = inner.open_cycles,
            cooldown_ms = cooldown.as_millis() as u64,
            "Circuit open"
        );
    }

    fn jittered_cooldown(&self, cycle: u32) -> Duration {
        let base = self.config.cooldown_for_cycle(cycle);
        let max_jitter_ms = (base.as_millis() as f64 * self.config.jitter_ratio) as u64;

        if max_jitter_ms == 0 {
            return base;
        }

        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        record_breaker_transition(&self.name, from, to);
        info!(breaker = %self.name, from = %from, to = %to, "Circuit state transition");
    }

    /// Forces the circuit closed and clears its failure history
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        *inner = BreakerState::closed(inner.epoch.wrapping_add(1));

        if from != CircuitState::Closed {
            record_breaker_transition(&self.name, from, CircuitState::Closed);
        }
        info!(breaker = %self.name, "Circuit manually reset");
    }

    /// Forces the circuit open for one cooldown
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        inner.epoch = inner.epoch.wrapping_add(1);
        self.trip(&mut inner);
        info!(breaker = %self.name, "Circuit manually opened");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        let now = Instant::now();

        let cooldown_until = inner
            .cooldown_until
            .filter(|until| inner.state != CircuitState::Closed && *until > now)
            .and_then(|until| chrono::Duration::from_std(until - now).ok())
            .map(|remaining| Utc::now() + remaining);

        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            cooldown_until,
            open_cycles: inner.open_cycles,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }
}

/// Frees the half-open probe slot when a probe future is dropped mid-flight
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            if inner.epoch == self.ticket.epoch {
                inner.probe_in_flight = false;
            }
            debug!(breaker = %self.breaker.name, "Probe cancelled, releasing slot");
        }
    }
}

/// Lazily-created breakers keyed by dependency name
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get or create the breaker for a name
    pub async fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;

            if let Some(cb) = breakers.get(name) {
                return cb.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// Runs `op` through the named breaker
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        self.breaker(name).await.call(op).await
    }

    /// Like [`execute`](Self::execute), but an open circuit or a dependency
    /// failure is handed to `fallback` instead of being returned
    pub async fn execute_with_fallback<T, F, Fut, FB, FutB>(
        &self,
        name: &str,
        op: F,
        fallback: FB,
    ) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
        FB: FnOnce(DomainError) -> FutB,
        FutB: Future<Output = Result<T, DomainError>>,
    {
        match self.execute(name, op).await {
            Err(e) if e.is_dependency_failure() => fallback(e).await,
            other => other,
        }
    }

    /// Status of one breaker; `None` until the name has been used
    pub async fn get_status(&self, name: &str) -> Option<CircuitStatus> {
        self.breakers.read().await.get(name).map(|cb| cb.status())
    }

    pub async fn get_all_status(&self) -> Vec<CircuitStatus> {
        let mut statuses: Vec<CircuitStatus> = self
            .breakers
            .read()
            .await
            .values()
            .map(|cb| cb.status())
            .collect();

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn reset(&self, name: &str) -> CircuitStatus {
        let breaker = self.breaker(name).await;
        breaker.reset();
        breaker.status()
    }

    pub async fn open(&self, name: &str) -> CircuitStatus {
        let breaker = self.breaker(name).await;
        breaker.force_open();
        breaker.status()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn registry(threshold: u32, cooldown: Duration) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new(threshold, cooldown)
                .with_jitter_ratio(0.0)
                .with_call_timeout(Duration::from_secs(5)),
        )
    }

    async fn fail(registry: &CircuitBreakerRegistry, name: &str) -> DomainError {
        registry
            .execute(name, || async {
                Err::<(), _>(DomainError::upstream(name.to_string(), "HTTP 502"))
            })
            .await
            .unwrap_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_short_circuits() {
        let registry = registry(3, Duration::from_secs(10));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            registry
                .execute("content-api", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DomainError::upstream("content-api", "HTTP 500"))
                })
                .await
                .unwrap_err();
        }

        let status = registry.get_status("content-api").await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.consecutive_failures, 3);

        let err = registry
            .execute("content-api", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DomainError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::CircuitOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let registry = Arc::new(registry(1, Duration::from_secs(10)));
        fail(&registry, "content-api").await;

        tokio::time::advance(Duration::from_secs(11)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_registry = registry.clone();
        let probe = tokio::spawn(async move {
            probe_registry
                .execute("content-api", || async move {
                    let _ = release_rx.await;
                    Ok::<_, DomainError>("fresh")
                })
                .await
        });

        tokio::task::yield_now().await;
        assert_eq!(
            registry.get_status("content-api").await.unwrap().state,
            CircuitState::HalfOpen
        );

        let calls = AtomicUsize::new(0);
        for _ in 0..5 {
            let err = registry
                .execute("content-api", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, DomainError>("concurrent")
                })
                .await
                .unwrap_err();
            assert!(matches!(err, DomainError::CircuitOpen { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), "fresh");

        let status = registry.get_status("content-api").await.unwrap();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_with_longer_cooldown() {
        let registry = registry(1, Duration::from_secs(10));
        fail(&registry, "content-api").await;

        tokio::time::advance(Duration::from_secs(10)).await;
        fail(&registry, "content-api").await;

        let status = registry.get_status("content-api").await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.open_cycles, 2);

        // Second cycle cools down for 20s, so 15s later it is still open
        tokio::time::advance(Duration::from_secs(15)).await;
        let err = fail(&registry, "content-api").await;
        match err {
            DomainError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(5))
            }
            other => panic!("expected circuit open, got {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        let ok = registry
            .execute("content-api", || async { Ok::<_, DomainError>(1) })
            .await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(
            registry.get_status("content-api").await.unwrap().open_cycles,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let registry = registry(1, Duration::from_secs(1));
        fail(&registry, "content-api").await;
        tokio::time::advance(Duration::from_secs(2)).await;

        {
            let probe = registry.execute("content-api", || async {
                std::future::pending::<Result<(), DomainError>>().await
            });
            let _ = tokio::time::timeout(Duration::from_millis(10), probe).await;
        }

        let result = registry
            .execute("content-api", || async { Ok::<_, DomainError>(()) })
            .await;
        assert!(result.is_ok());
        assert_eq!(registry.breaker("content-api").await.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new(1, Duration::from_secs(30))
                .with_call_timeout(Duration::from_millis(100)),
        );

        let err = registry
            .execute("slow", || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, DomainError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Upstream { .. }));
        assert_eq!(registry.breaker("slow").await.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let registry = registry(2, Duration::from_secs(10));

        for _ in 0..5 {
            registry
                .execute("content-api", || async {
                    Err::<(), _>(DomainError::not_found("no such article"))
                })
                .await
                .unwrap_err();
        }

        assert_eq!(
            registry.breaker("content-api").await.state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_fallback_used_when_open() {
        let registry = registry(1, Duration::from_secs(60));
        fail(&registry, "content-api").await;

        let result = registry
            .execute_with_fallback(
                "content-api",
                || async { Ok::<_, DomainError>("live") },
                |err| async move {
                    assert!(matches!(err, DomainError::CircuitOpen { .. }));
                    Ok("fallback")
                },
            )
            .await;

        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn test_fallback_not_used_for_client_errors() {
        let registry = registry(1, Duration::from_secs(60));

        let result = registry
            .execute_with_fallback(
                "content-api",
                || async { Err::<&str, _>(DomainError::not_found("missing")) },
                |_| async { Ok("fallback") },
            )
            .await;

        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_manual_open_and_reset() {
        let registry = registry(5, Duration::from_secs(60));

        let opened = registry.open("content-api").await;
        assert_eq!(opened.state, CircuitState::Open);
        assert!(opened.cooldown_until.is_some());

        let reset = registry.reset("content-api").await;
        assert_eq!(reset.state, CircuitState::Closed);
        assert_eq!(reset.open_cycles, 0);

        let all = registry.get_all_status().await;
        assert_eq!(all.len(), 1);
        assert!(registry.get_status("unknown").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_open_wins_over_in_flight_recovery() {
        let registry = Arc::new(registry(1, Duration::from_secs(10)));
        fail(&registry, "content-api").await;

        tokio::time::advance(Duration::from_secs(11)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_registry = registry.clone();
        let trial = tokio::spawn(async move {
            trial_registry
                .execute("content-api", || async move {
                    let _ = release_rx.await;
                    Ok::<_, DomainError>("recovered")
                })
                .await
        });

        tokio::task::yield_now().await;
        assert_eq!(
            registry.get_status("content-api").await.unwrap().state,
            CircuitState::HalfOpen
        );

        let opened = registry.open("content-api").await;
        assert_eq!(opened.state, CircuitState::Open);

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), "recovered");

        let status = registry.get_status("content-api").await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.cooldown_until.is_some());
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let registry = registry(1, Duration::from_secs(60));
        fail(&registry, "search-api").await;

        assert_eq!(registry.breaker("search-api").await.state(), CircuitState::Open);
        assert_eq!(
            registry.breaker("content-api").await.state(),
            CircuitState::Closed
        );
    }
}
