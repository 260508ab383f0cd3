//! Bulk re-categorization job handlers
//!
//! Jobs run in the background; clients poll `GET /api/jobs/:id`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_actor, spawn_job, AppError, AppState, MAX_PAGE_LIMIT};
use tally_core::models::RecategorizeJob;
use tally_core::recategorize;

/// POST /api/users/:user_id/recategorize - Start (or join) a bulk job
pub async fn start_recategorize(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<RecategorizeJob>, AppError> {
    let job = recategorize::start_recategorize(&state.db, user_id)?;

    state.db.log_audit(
        &get_actor(&headers),
        "recategorize_start",
        Some("job"),
        Some(job.id),
        Some(&format!("user={}, total={}", user_id, job.total)),
    )?;

    spawn_job(state.clone(), job.id);
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default = "default_job_limit")]
    pub limit: i64,
}

fn default_job_limit() -> i64 {
    20
}

/// GET /api/users/:user_id/jobs - A user's jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(params): Query<JobListQuery>,
) -> Result<Json<Vec<RecategorizeJob>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_jobs(user_id, limit)?))
}

/// GET /api/jobs/:id - Poll a job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RecategorizeJob>, AppError> {
    let job = state
        .db
        .get_job(id)?
        .ok_or_else(|| AppError::not_found("Job not found"))?;
    Ok(Json(job))
}

/// POST /api/jobs/:id/cancel - Stop a job at the next batch boundary
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<RecategorizeJob>, AppError> {
    let job = recategorize::request_cancel(&state.db, id)?;

    state.db.log_audit(
        &get_actor(&headers),
        "recategorize_cancel",
        Some("job"),
        Some(id),
        None,
    )?;

    Ok(Json(job))
}

/// POST /api/jobs/:id/resume - Continue a cancelled or failed job from its checkpoint
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<RecategorizeJob>, AppError> {
    let job = recategorize::resume(&state.db, id)?;

    state.db.log_audit(
        &get_actor(&headers),
        "recategorize_resume",
        Some("job"),
        Some(id),
        Some(&format!("checkpoint={}", job.checkpoint_id)),
    )?;

    spawn_job(state.clone(), job.id);
    Ok(Json(job))
}
