//! Transaction handlers: ingest, listing, categorization and corrections

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{get_actor, spawn_job, AppError, AppState, MAX_INGEST_BATCH, MAX_PAGE_LIMIT};
use tally_core::models::{CategorizedTransaction, NewTransaction, RecategorizeJob, Transaction};
use tally_core::{correct_category, recategorize, IngestResult};

/// Query parameters for paginated listings
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl PageQuery {
    /// Clamp pagination parameters
    fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, MAX_PAGE_LIMIT), self.offset.max(0))
    }
}

#[derive(Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<Transaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Body of an ingest call: a batch of sync records
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub transactions: Vec<NewTransaction>,
}

/// POST /api/users/:user_id/transactions - Ingest a batch from ledger sync
pub async fn ingest_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(body): Json<IngestRequest>,
) -> Result<Json<IngestResult>, AppError> {
    if body.transactions.len() > MAX_INGEST_BATCH {
        return Err(AppError::bad_request(&format!(
            "At most {} transactions per request",
            MAX_INGEST_BATCH
        )));
    }

    let categorizer = state.categorizer()?;
    let result = categorizer.ingest(user_id, &body.transactions).await?;

    info!(
        user_id,
        inserted = result.inserted,
        skipped = result.skipped,
        failed = result.failed,
        "Ingested sync batch"
    );

    Ok(Json(result))
}

/// GET /api/users/:user_id/transactions - List transactions, newest first
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(params): Query<PageQuery>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let (limit, offset) = params.clamped();

    let transactions = state.db.list_transactions(user_id, limit, offset)?;
    let total = state.db.count_transactions(user_id)?;

    Ok(Json(TransactionListResponse {
        transactions,
        total,
        limit,
        offset,
    }))
}

/// GET /api/users/:user_id/transactions/:id - One categorized transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path((user_id, id)): Path<(i64, i64)>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state
        .db
        .get_transaction(user_id, id)?
        .ok_or_else(|| AppError::not_found("Transaction not found"))?;
    Ok(Json(tx))
}

/// POST /api/users/:user_id/transactions/:id/categorize - Re-run the tiers on one transaction
pub async fn categorize_transaction(
    State(state): State<Arc<AppState>>,
    Path((user_id, id)): Path<(i64, i64)>,
) -> Result<Json<CategorizedTransaction>, AppError> {
    let tx = state
        .db
        .get_transaction(user_id, id)?
        .ok_or_else(|| AppError::not_found("Transaction not found"))?;

    let categorizer = state.categorizer()?;
    let categorized = categorizer.categorize(&tx).await?;
    Ok(Json(categorized))
}

/// Body of a correction
#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub category: String,
    /// Start a bulk re-categorization afterwards
    #[serde(default)]
    pub recategorize: bool,
}

#[derive(Serialize)]
pub struct CorrectionResponse {
    pub transaction: CategorizedTransaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<RecategorizeJob>,
}

/// PUT /api/users/:user_id/transactions/:id/category - Correct a category
pub async fn correct_transaction(
    State(state): State<Arc<AppState>>,
    Path((user_id, id)): Path<(i64, i64)>,
    headers: HeaderMap,
    Json(body): Json<CorrectionRequest>,
) -> Result<Json<CorrectionResponse>, AppError> {
    let actor = get_actor(&headers);

    let transaction = correct_category(&state.db, user_id, id, &body.category)?;

    state.db.log_audit(
        &actor,
        "correct_category",
        Some("transaction"),
        Some(id),
        Some(&format!(
            "user={}, category={}, token={}",
            user_id, transaction.category, transaction.merchant_token
        )),
    )?;

    let job = if body.recategorize {
        let job = recategorize::start_recategorize(&state.db, user_id)?;
        spawn_job(state.clone(), job.id);
        Some(job)
    } else {
        None
    };

    Ok(Json(CorrectionResponse { transaction, job }))
}

/// GET /api/users/:user_id/review - Transactions waiting for review
pub async fn list_review(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(params): Query<PageQuery>,
) -> Result<Json<Vec<CategorizedTransaction>>, AppError> {
    let (limit, offset) = params.clamped();

    let transactions = state
        .db
        .list_needs_review(user_id, limit, offset)?
        .iter()
        .filter_map(Transaction::categorized)
        .collect();

    Ok(Json(transactions))
}
