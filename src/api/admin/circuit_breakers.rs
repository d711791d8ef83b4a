//! Circuit breaker introspection and override endpoints

use axum::extract::{Path, State};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::middleware::RequireAdmin;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::CircuitStatus;

#[derive(Debug, Clone, Serialize)]
pub struct ListCircuitBreakersResponse {
    pub breakers: Vec<CircuitStatus>,
    pub total: usize,
}

/// GET /admin/circuit-breakers
pub async fn list_circuit_breakers(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Json<ListCircuitBreakersResponse> {
    let breakers = state.breakers.get_all_status().await;
    let total = breakers.len();

    Json(ListCircuitBreakersResponse { breakers, total })
}

/// GET /admin/circuit-breakers/{name}
pub async fn get_circuit_breaker(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(name): Path<String>,
) -> Result<Json<CircuitStatus>, ApiError> {
    debug!(breaker = %name, "Admin reading circuit breaker");

    state
        .breakers
        .get_status(&name)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Circuit breaker '{}' not found", name)))
}

/// POST /admin/circuit-breakers/{name}/reset
pub async fn reset_circuit_breaker(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(name): Path<String>,
) -> Json<CircuitStatus> {
    warn!(breaker = %name, "Circuit breaker reset by admin");
    Json(state.breakers.reset(&name).await)
}

/// POST /admin/circuit-breakers/{name}/open
pub async fn open_circuit_breaker(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(name): Path<String>,
) -> Json<CircuitStatus> {
    warn!(breaker = %name, "Circuit breaker forced open by admin");
    Json(state.breakers.open(&name).await)
}
