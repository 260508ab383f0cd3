//! Transaction operations

use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{NewTransaction, Transaction};
use crate::policy::Verdict;

/// Result of inserting a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionInsertResult {
    /// Transaction was inserted successfully, contains new transaction ID
    Inserted(i64),
    /// Transaction was a duplicate, contains existing transaction ID
    Duplicate(i64),
}

impl TransactionInsertResult {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) => *id,
        }
    }
}

/// Dedupe hash for a sync record
///
/// Covers user, date, description and amount, plus the ledger's external id
/// when it supplies one (so two identical same-day charges with distinct ids
/// are both kept).
pub fn compute_import_hash(user_id: i64, tx: &NewTransaction) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(tx.date.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(tx.description.as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:.2}", tx.amount).as_bytes());
    if let Some(ref external_id) = tx.external_id {
        hasher.update(b"|");
        hasher.update(external_id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

const TRANSACTION_COLUMNS: &str = "id, user_id, date, amount, description, merchant_name, \
     import_hash, category, categorization_method, confidence, needs_review, \
     categorized_at, created_at";

impl Database {
    /// Insert a transaction (skips duplicates based on import_hash)
    pub fn insert_transaction(
        &self,
        user_id: i64,
        tx: &NewTransaction,
    ) -> Result<TransactionInsertResult> {
        let conn = self.conn()?;
        let import_hash = compute_import_hash(user_id, tx);

        // INSERT OR IGNORE so two concurrent deliveries of the same record can't both land
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO transactions (user_id, date, amount, description, merchant_name, import_hash)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                user_id,
                tx.date.to_string(),
                tx.amount,
                tx.description,
                tx.merchant_name,
                import_hash,
            ],
        )?;

        if inserted == 1 {
            return Ok(TransactionInsertResult::Inserted(conn.last_insert_rowid()));
        }

        let existing: i64 = conn.query_row(
            "SELECT id FROM transactions WHERE import_hash = ?",
            params![import_hash],
            |row| row.get(0),
        )?;
        Ok(TransactionInsertResult::Duplicate(existing))
    }

    /// Get a transaction owned by `user_id`
    pub fn get_transaction(&self, user_id: i64, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transactions WHERE id = ? AND user_id = ?",
                    TRANSACTION_COLUMNS
                ),
                params![id, user_id],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List a user's transactions, newest first
    pub fn list_transactions(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions that have never been categorized, oldest first
    pub fn list_uncategorized(&self, user_id: i64, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? AND category IS NULL ORDER BY id LIMIT ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions flagged for review, newest first
    pub fn list_needs_review(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? AND needs_review = 1 AND category IS NOT NULL \
             ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Next batch of a user's transactions with id greater than `after_id`, in id order
    pub fn list_transactions_after(&self, user_id: i64, after_id: i64, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? AND id > ? ORDER BY id LIMIT ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, after_id, limit], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count a user's transactions
    pub fn count_transactions(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count a user's transactions with id greater than `after_id`
    pub fn count_transactions_after(&self, user_id: i64, after_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ? AND id > ?",
            params![user_id, after_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count a user's transactions currently flagged for review
    pub fn count_needs_review(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ? AND needs_review = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Persist a categorization verdict on a transaction
    pub fn update_categorization(&self, id: i64, verdict: &Verdict) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE transactions
            SET category = ?, categorization_method = ?, confidence = ?, needs_review = ?, categorized_at = ?
            WHERE id = ?
            "#,
            params![
                verdict.category.as_str(),
                verdict.method.map(|m| m.as_str()),
                verdict.confidence,
                verdict.needs_review,
                format_datetime(&Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    /// Helper to convert a row to Transaction
    /// Column order matches `TRANSACTION_COLUMNS`
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let date_str: String = row.get(2)?;
        let category_str: Option<String> = row.get(7)?;
        let method_str: Option<String> = row.get(8)?;
        let needs_review: i64 = row.get(10)?;
        let categorized_at_str: Option<String> = row.get(11)?;
        let created_at_str: String = row.get(12)?;
        Ok(Transaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").unwrap_or_default(),
            amount: row.get(3)?,
            description: row.get(4)?,
            merchant_name: row.get(5)?,
            import_hash: row.get(6)?,
            category: category_str.and_then(|s| s.parse().ok()),
            categorization_method: method_str.and_then(|s| s.parse().ok()),
            confidence: row.get(9)?,
            needs_review: needs_review != 0,
            categorized_at: categorized_at_str.map(|s| parse_datetime(&s)),
            created_at: parse_datetime(&created_at_str),
        })
    }
}
