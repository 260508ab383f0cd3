//! Learned pattern store
//!
//! One row per (user, merchant token). Writes are single-statement upserts so
//! concurrent corrections resolve to last-write-wins inside SQLite.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{CategorizationMethod, Category, LearnedPattern};
use crate::policy::LEARNED_CONFIDENCE;

const UPSERT_PATTERN_SQL: &str = r#"
    INSERT INTO learned_patterns (user_id, merchant_token, category, amount, corrected_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(user_id, merchant_token) DO UPDATE SET
        category = excluded.category,
        amount = excluded.amount,
        corrected_at = excluded.corrected_at,
        correction_count = correction_count + 1
"#;

fn upsert_pattern(
    conn: &Connection,
    user_id: i64,
    merchant_token: &str,
    category: Category,
    amount: Option<f64>,
) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_PATTERN_SQL,
        params![
            user_id,
            merchant_token,
            category.as_str(),
            amount,
            format_datetime(&Utc::now()),
        ],
    )
}

impl Database {
    /// Look up the learned category for a user's merchant token (read-only)
    pub fn lookup_learned_category(&self, user_id: i64, merchant_token: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category: Option<String> = conn
            .query_row(
                "SELECT category FROM learned_patterns WHERE user_id = ? AND merchant_token = ?",
                params![user_id, merchant_token],
                |row| row.get(0),
            )
            .optional()?;

        category
            .map(|s| {
                s.parse::<Category>().map_err(|e| {
                    Error::InvalidData(format!("learned pattern '{}': {}", merchant_token, e))
                })
            })
            .transpose()
    }

    /// Record (or overwrite) a learned pattern
    pub fn upsert_learned_pattern(
        &self,
        user_id: i64,
        merchant_token: &str,
        category: Category,
        amount: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        upsert_pattern(&conn, user_id, merchant_token, category, amount)?;
        Ok(())
    }

    /// Apply a user correction: upsert the learned pattern and mark the
    /// transaction as learned, atomically
    ///
    /// Returns `false` (and writes nothing) when the transaction does not
    /// belong to the user.
    pub fn apply_correction(
        &self,
        user_id: i64,
        transaction_id: i64,
        merchant_token: &str,
        category: Category,
        amount: Option<f64>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;

        let updated = db_tx.execute(
            r#"
            UPDATE transactions
            SET category = ?, categorization_method = ?, confidence = ?, needs_review = 0, categorized_at = ?
            WHERE id = ? AND user_id = ?
            "#,
            params![
                category.as_str(),
                CategorizationMethod::LearnedPattern.as_str(),
                LEARNED_CONFIDENCE,
                format_datetime(&Utc::now()),
                transaction_id,
                user_id,
            ],
        )?;

        if updated == 0 {
            // Dropping the transaction rolls it back
            return Ok(false);
        }

        upsert_pattern(&db_tx, user_id, merchant_token, category, amount)?;
        db_tx.commit()?;
        Ok(true)
    }

    /// List a user's learned patterns, most recently corrected first
    pub fn list_learned_patterns(&self, user_id: i64) -> Result<Vec<LearnedPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, merchant_token, category, amount, corrected_at
            FROM learned_patterns
            WHERE user_id = ?
            ORDER BY corrected_at DESC, id DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                let category_str: String = row.get(3)?;
                let corrected_at_str: String = row.get(5)?;
                Ok((
                    LearnedPattern {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        merchant_token: row.get(2)?,
                        category: Category::Other,
                        amount: row.get(4)?,
                        corrected_at: parse_datetime(&corrected_at_str),
                    },
                    category_str,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Rows with a label we no longer know are skipped rather than failing the listing
        Ok(rows
            .into_iter()
            .filter_map(|(mut pattern, category)| {
                pattern.category = category.parse().ok()?;
                Some(pattern)
            })
            .collect())
    }

    /// Count a user's learned patterns
    pub fn count_learned_patterns(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM learned_patterns WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Forget a learned pattern; returns whether one existed
    pub fn delete_learned_pattern(&self, user_id: i64, merchant_token: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM learned_patterns WHERE user_id = ? AND merchant_token = ?",
            params![user_id, merchant_token],
        )?;
        Ok(deleted > 0)
    }
}
