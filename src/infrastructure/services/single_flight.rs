//! Per-key request coalescing

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::DomainError;
use crate::infrastructure::observability::record_coalesced_waiter;

type SharedFlight<T> = Shared<BoxFuture<'static, Result<T, DomainError>>>;

/// Whether a caller started the flight or joined one already running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Waiter,
}

/// Runs at most one future per key at a time; concurrent callers for the
/// same key share its result.
///
/// The leader's future is spawned, so it completes even if every caller
/// is dropped. The key is released only after that future finishes.
#[derive(Debug)]
pub struct SingleFlight<T: Clone> {
    inflight: Arc<Mutex<HashMap<String, SharedFlight<T>>>>,
}

impl<T: Clone> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`, starting it with `fut` if none is running.
    ///
    /// `fut` is dropped unpolled when the caller joins an existing flight.
    pub async fn run<F>(&self, key: &str, fut: F) -> (Result<T, DomainError>, FlightRole)
    where
        F: Future<Output = Result<T, DomainError>> + Send + 'static,
    {
        let (flight, role) = {
            let mut inflight = self.inflight.lock().await;

            match inflight.get(key) {
                Some(existing) => (existing.clone(), FlightRole::Waiter),
                None => {
                    let flight = self.start(key.to_string(), fut);
                    inflight.insert(key.to_string(), flight.clone());
                    (flight, FlightRole::Leader)
                }
            }
        };

        if role == FlightRole::Waiter {
            debug!(key = %key, "Joining in-flight request");
            record_coalesced_waiter();
        }

        (flight.await, role)
    }

    fn start<F>(&self, key: String, fut: F) -> SharedFlight<T>
    where
        F: Future<Output = Result<T, DomainError>> + Send + 'static,
    {
        let inflight = self.inflight.clone();

        let task = tokio::spawn(async move {
            let result = fut.await;
            inflight.lock().await.remove(&key);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(DomainError::internal(format!("In-flight request failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Number of keys with a flight currently running
    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}
