//! Cache invalidation admin endpoints

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::middleware::RequireAdmin;
use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateTagRequest {
    pub tag: String,
    /// Delete the tagged entries too, not just the tag mapping
    #[serde(default = "default_delete_entries")]
    pub delete_entries: bool,
}

fn default_delete_entries() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateTagResponse {
    pub tag: String,
    pub purged: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteKeysQuery {
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteKeysResponse {
    pub pattern: String,
    pub purged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagKeysResponse {
    pub tag: String,
    pub keys: Vec<String>,
    pub total: usize,
}

/// POST /admin/cache/invalidate
pub async fn invalidate_tag(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Json(request): Json<InvalidateTagRequest>,
) -> Result<Json<InvalidateTagResponse>, ApiError> {
    let tag = request.tag.trim().to_string();

    if tag.is_empty() {
        return Err(ApiError::bad_request("Tag must not be empty"));
    }

    let purged = if request.delete_entries {
        state.invalidation().purge(&tag).await?
    } else {
        state.invalidation().remove_tag(&tag).await?;
        0
    };

    info!(tag = %tag, purged, delete_entries = request.delete_entries, "Invalidated cache tag");

    Ok(Json(InvalidateTagResponse { tag, purged }))
}

/// DELETE /admin/cache/keys?pattern=
pub async fn delete_keys(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Query(query): Query<DeleteKeysQuery>,
) -> Result<Json<DeleteKeysResponse>, ApiError> {
    let pattern = query.pattern.trim().to_string();

    if pattern.is_empty() {
        return Err(ApiError::bad_request("Pattern must not be empty"));
    }

    let purged = state.store.delete_pattern(&pattern).await?;

    info!(pattern = %pattern, purged, "Deleted cache keys by pattern");

    Ok(Json(DeleteKeysResponse { pattern, purged }))
}

/// GET /admin/cache/tags/{tag}
pub async fn get_tag_keys(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(tag): Path<String>,
) -> Result<Json<TagKeysResponse>, ApiError> {
    debug!(tag = %tag, "Admin listing tagged keys");

    let keys = state.invalidation().keys_for(&tag).await?;
    let total = keys.len();

    Ok(Json(TagKeysResponse { tag, keys, total }))
}
