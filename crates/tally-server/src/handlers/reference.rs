//! Reference data, previews and health

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use tally_core::ai::AiStatus;
use tally_core::models::Category;
use tally_core::normalize::normalize_merchant;
use tally_core::rules::{Rule, RuleMatch};
use tally_core::Resolution;

#[derive(Serialize)]
pub struct CategoryInfo {
    pub label: &'static str,
    pub slug: &'static str,
}

/// GET /api/categories - The closed category set
pub async fn list_categories() -> Json<Vec<CategoryInfo>> {
    Json(
        Category::all()
            .iter()
            .map(|c| CategoryInfo {
                label: c.as_str(),
                slug: c.slug(),
            })
            .collect(),
    )
}

/// GET /api/rules - The active rule table, in match order
pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<Rule>> {
    Json(state.rules.rules().to_vec())
}

#[derive(Debug, Deserialize)]
pub struct DescriptionRequest {
    pub description: String,
}

#[derive(Serialize)]
pub struct RuleTestResponse {
    pub merchant_token: String,
    pub matches: Vec<RuleMatch>,
}

/// POST /api/rules/test - Every rule matching a description (first one wins)
pub async fn test_rules(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DescriptionRequest>,
) -> Json<RuleTestResponse> {
    let merchant_token = normalize_merchant(&body.description);
    let matches = state.rules.test_rules(&merchant_token);
    Json(RuleTestResponse {
        merchant_token,
        matches,
    })
}

/// POST /api/users/:user_id/categorize/preview - Resolve without persisting
pub async fn preview_categorization(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<DescriptionRequest>,
) -> Result<Json<Resolution>, AppError> {
    let categorizer = state.categorizer()?;
    Ok(Json(categorizer.resolve(user_id, &body.description).await))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub rules: usize,
    pub review_threshold: f64,
    /// None when the AI tier is disabled
    pub ai: Option<AiStatus>,
}

/// GET /api/health - Store, rule table and AI tier status
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = state.db.conn().is_ok();
    let ai = match state.ai {
        Some(ref ai) => Some(ai.status().await),
        None => None,
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        rules: state.rules.len(),
        review_threshold: state.engine.review_threshold,
        ai,
    })
}
