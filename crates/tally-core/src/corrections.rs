//! User corrections
//!
//! A correction teaches the learned pattern store: the transaction's merchant
//! token maps to the chosen category from now on. Past transactions with the
//! same token only change through an explicit bulk re-categorization.

use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorizedTransaction, Category};
use crate::normalize::normalize_merchant;

/// Parse a user-supplied category label (or slug)
pub fn parse_category(input: &str) -> Result<Category> {
    input
        .trim()
        .parse::<Category>()
        .map_err(Error::Validation)
}

/// Correct a transaction's category and record the learned pattern
///
/// The category is validated before anything is read or written. The pattern
/// upsert and the transaction update commit together.
pub fn correct_category(
    db: &Database,
    user_id: i64,
    transaction_id: i64,
    category: &str,
) -> Result<CategorizedTransaction> {
    let category = parse_category(category)?;

    let tx = db
        .get_transaction(user_id, transaction_id)?
        .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;

    let token = normalize_merchant(&tx.description);

    if !db.apply_correction(user_id, tx.id, &token, category, Some(tx.amount))? {
        // Deleted between the read and the write
        return Err(Error::NotFound(format!("transaction {}", transaction_id)));
    }

    info!(
        user_id,
        transaction_id,
        merchant_token = %token,
        "Learned '{}' -> {}", token, category
    );

    let updated = db
        .get_transaction(user_id, transaction_id)?
        .and_then(|t| t.categorized())
        .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;
    Ok(updated)
}
