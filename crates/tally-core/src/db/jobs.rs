//! Bulk re-categorization job persistence

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{JobStatus, RecategorizeJob, TierBreakdown};

const JOB_COLUMNS: &str = "id, user_id, status, checkpoint_id, processed, total, by_learned, \
     by_rule, by_ai, fallback_to_other, cancel_requested, restart_requested, error, created_at, started_at, completed_at";

impl Database {
    /// Create a pending job for a user
    pub fn create_job(&self, user_id: i64, total: i64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO recategorize_jobs (user_id, status, total) VALUES (?, ?, ?)",
            params![user_id, JobStatus::Pending.as_str(), total],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<RecategorizeJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM recategorize_jobs WHERE id = ?", JOB_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// The user's pending or running job, if any
    pub fn find_active_job(&self, user_id: i64) -> Result<Option<RecategorizeJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM recategorize_jobs WHERE user_id = ? AND status IN ('pending', 'running') \
                     ORDER BY id DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![user_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// A user's jobs, newest first
    pub fn list_jobs(&self, user_id: i64, limit: i64) -> Result<Vec<RecategorizeJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recategorize_jobs WHERE user_id = ? ORDER BY id DESC LIMIT ?",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![user_id, limit], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Jobs left pending or running (e.g. by a previous process), oldest first
    pub fn list_unfinished_jobs(&self) -> Result<Vec<RecategorizeJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recategorize_jobs WHERE status IN ('pending', 'running') ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Mark a job running (keeps the original start time on resume)
    pub fn mark_job_running(&self, id: i64, total: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE recategorize_jobs
            SET status = 'running', total = ?, error = NULL, completed_at = NULL,
                started_at = COALESCE(started_at, ?)
            WHERE id = ?
            "#,
            params![total, format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    /// Commit progress after a batch
    pub fn save_job_checkpoint(
        &self,
        id: i64,
        checkpoint_id: i64,
        processed: i64,
        breakdown: &TierBreakdown,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE recategorize_jobs
            SET checkpoint_id = ?1, processed = ?2, total = MAX(total, ?2),
                by_learned = ?3, by_rule = ?4, by_ai = ?5, fallback_to_other = ?6
            WHERE id = ?7
            "#,
            params![
                checkpoint_id,
                processed,
                breakdown.by_learned,
                breakdown.by_rule,
                breakdown.by_ai,
                breakdown.fallback_to_other,
                id,
            ],
        )?;
        Ok(())
    }

    /// Move a job to a terminal status
    pub fn finish_job(&self, id: i64, status: JobStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE recategorize_jobs SET status = ?, error = ?, completed_at = ? WHERE id = ?",
            params![status.as_str(), error, format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    /// Flag an active job for cancellation; returns false if it was not active
    pub fn request_job_cancel(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE recategorize_jobs SET cancel_requested = 1 WHERE id = ? AND status IN ('pending', 'running')",
            params![id],
        )?;
        Ok(updated > 0)
    }

    pub fn is_job_cancel_requested(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let requested: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM recategorize_jobs WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(requested.map_or(true, |r| r != 0))
    }

    /// Flag an active job to start over from the first transaction
    ///
    /// A pending cancellation is withdrawn. Returns false if the job was not active.
    pub fn request_job_restart(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE recategorize_jobs SET restart_requested = 1, cancel_requested = 0
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
            params![id],
        )?;
        Ok(updated > 0)
    }

    /// Consume a restart request: clear the flag and rewind checkpoint and
    /// counters in one statement
    ///
    /// Returns the new total when the job was rewound.
    pub fn take_job_restart(&self, id: i64) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE recategorize_jobs
            SET restart_requested = 0, checkpoint_id = 0, processed = 0,
                by_learned = 0, by_rule = 0, by_ai = 0, fallback_to_other = 0,
                total = (SELECT COUNT(*) FROM transactions t WHERE t.user_id = recategorize_jobs.user_id)
            WHERE id = ? AND restart_requested = 1
            "#,
            params![id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let total: i64 = conn.query_row(
            "SELECT total FROM recategorize_jobs WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(total))
    }

    /// Mark a job completed unless a restart was requested in the meantime
    pub fn complete_job(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE recategorize_jobs SET status = 'completed', error = NULL, completed_at = ?
            WHERE id = ? AND restart_requested = 0
            "#,
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(updated > 0)
    }

    /// Put a cancelled or failed job back to pending so it can resume from its checkpoint
    pub fn reopen_job(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE recategorize_jobs
            SET status = 'pending', cancel_requested = 0, error = NULL, completed_at = NULL
            WHERE id = ? AND status IN ('cancelled', 'failed')
            "#,
            params![id],
        )?;
        Ok(updated > 0)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<RecategorizeJob> {
        let status_str: String = row.get(2)?;
        let cancel_requested: i64 = row.get(10)?;
        let restart_requested: i64 = row.get(11)?;
        let created_at_str: String = row.get(13)?;
        let started_at_str: Option<String> = row.get(14)?;
        let completed_at_str: Option<String> = row.get(15)?;
        Ok(RecategorizeJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: status_str.parse().unwrap_or(JobStatus::Failed),
            checkpoint_id: row.get(3)?,
            processed: row.get(4)?,
            total: row.get(5)?,
            breakdown: TierBreakdown {
                by_learned: row.get(6)?,
                by_rule: row.get(7)?,
                by_ai: row.get(8)?,
                fallback_to_other: row.get(9)?,
            },
            cancel_requested: cancel_requested != 0,
            restart_requested: restart_requested != 0,
            error: row.get(12)?,
            created_at: parse_datetime(&created_at_str),
            started_at: started_at_str.map(|s| parse_datetime(&s)),
            completed_at: completed_at_str.map(|s| parse_datetime(&s)),
        })
    }
}
