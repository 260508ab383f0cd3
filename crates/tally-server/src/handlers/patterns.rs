//! Learned pattern handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::{get_actor, AppError, AppState, SuccessResponse};
use tally_core::models::LearnedPattern;

/// GET /api/users/:user_id/patterns - List learned patterns
pub async fn list_patterns(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<LearnedPattern>>, AppError> {
    Ok(Json(state.db.list_learned_patterns(user_id)?))
}

/// DELETE /api/users/:user_id/patterns/:token - Forget a learned pattern
pub async fn delete_pattern(
    State(state): State<Arc<AppState>>,
    Path((user_id, token)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.db.delete_learned_pattern(user_id, &token)? {
        return Err(AppError::not_found("Learned pattern not found"));
    }

    state.db.log_audit(
        &get_actor(&headers),
        "delete_pattern",
        Some("learned_pattern"),
        None,
        Some(&format!("user={}, token={}", user_id, token)),
    )?;

    Ok(Json(SuccessResponse { success: true }))
}
