//! Bulk re-categorization jobs
//!
//! A job walks one user's transactions in id order, re-running the full tier
//! chain on each batch. After every batch the last processed id and the tier
//! counters are committed, so a cancelled, failed or interrupted job resumes
//! where it stopped. Re-running over the same state produces the same result.
//!
//! Jobs hold no locks: transactions ingested while a job runs are categorized
//! by the normal path, and picked up by the job if their id is past the
//! checkpoint.

use tracing::{error, info, warn};

use crate::categorize::{Categorizer, ProgressCallback};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{JobStatus, RecategorizeJob, TierBreakdown};

/// Default number of transactions per batch
pub const DEFAULT_BATCH_SIZE: i64 = 200;

/// Start a bulk re-categorization for a user
///
/// A user has at most one active job. If one exists it is flagged to rewind
/// to the first transaction at its next batch boundary, so patterns learned
/// since it started reach the transactions it already passed.
pub fn start_recategorize(db: &Database, user_id: i64) -> Result<RecategorizeJob> {
    if let Some(existing) = db.find_active_job(user_id)? {
        if db.request_job_restart(existing.id)? {
            info!(
                "User {} already has active job {} ({}), restarting it from the beginning",
                user_id, existing.id, existing.status
            );
            return fetch_job(db, existing.id);
        }
        // Finished between the lookup and the flag; fall through to a fresh job
    }

    let total = db.count_transactions(user_id)?;
    let id = db.create_job(user_id, total)?;
    info!("Created re-categorization job {} for user {} ({} transactions)", id, user_id, total);

    fetch_job(db, id)
}

/// Run (or continue) a job until it completes, is cancelled, or fails
///
/// The categorizer must have been built for the job's database. The progress
/// callback receives (processed, total) after every batch. A learned-pattern
/// lookup failure fails the job at its last checkpoint rather than writing a
/// weaker verdict.
pub async fn run_job(
    db: &Database,
    categorizer: &Categorizer<'_>,
    job_id: i64,
    batch_size: i64,
    progress: Option<&ProgressCallback>,
) -> Result<RecategorizeJob> {
    let job = fetch_job(db, job_id)?;

    if !job.status.is_active() {
        return Err(Error::Job(format!("job {} is already {}", job_id, job.status)));
    }

    let batch_size = batch_size.max(1);
    let user_id = job.user_id;
    let mut checkpoint = job.checkpoint_id;
    let mut processed = job.processed;
    let mut breakdown = job.breakdown.clone();

    let mut total = processed + db.count_transactions_after(user_id, checkpoint)?;
    db.mark_job_running(job_id, total)?;

    if checkpoint > 0 {
        info!("Resuming job {} after transaction {} ({}/{})", job_id, checkpoint, processed, total);
    } else {
        info!("Running job {} for user {} ({} transactions)", job_id, user_id, total);
    }

    loop {
        if db.is_job_cancel_requested(job_id)? {
            info!("Job {} cancelled at {}/{}", job_id, processed, total);
            db.finish_job(job_id, JobStatus::Cancelled, None)?;
            return fetch_job(db, job_id);
        }

        if let Some(new_total) = db.take_job_restart(job_id)? {
            info!(
                "Job {} restarting from the first transaction ({} transactions)",
                job_id, new_total
            );
            checkpoint = 0;
            processed = 0;
            breakdown = TierBreakdown::default();
            total = new_total;
        }

        let batch = db.list_transactions_after(user_id, checkpoint, batch_size)?;
        let Some(last) = batch.last() else {
            if db.complete_job(job_id)? {
                break;
            }
            // A restart arrived after the last check
            continue;
        };
        let last_id = last.id;

        let result = match categorizer.recategorize_batch(&batch, None).await {
            Ok(result) => result,
            Err(e) => {
                error!("Job {} failed after transaction {}: {}", job_id, checkpoint, e);
                if let Err(finish_err) = db.finish_job(job_id, JobStatus::Failed, Some(&e.to_string())) {
                    warn!("Could not mark job {} failed: {}", job_id, finish_err);
                }
                return Err(e);
            }
        };

        checkpoint = last_id;
        processed += result.processed;
        breakdown.by_learned += result.breakdown.by_learned;
        breakdown.by_rule += result.breakdown.by_rule;
        breakdown.by_ai += result.breakdown.by_ai;
        breakdown.fallback_to_other += result.breakdown.fallback_to_other;
        db.save_job_checkpoint(job_id, checkpoint, processed, &breakdown)?;

        if let Some(cb) = progress {
            cb(processed, total.max(processed));
        }
    }

    info!(
        "Job {} completed: {} transactions ({} learned, {} rule, {} AI, {} other)",
        job_id,
        processed,
        breakdown.by_learned,
        breakdown.by_rule,
        breakdown.by_ai,
        breakdown.fallback_to_other
    );
    fetch_job(db, job_id)
}

/// Ask a running or pending job to stop at the next batch boundary
pub fn request_cancel(db: &Database, job_id: i64) -> Result<RecategorizeJob> {
    let job = fetch_job(db, job_id)?;
    if !db.request_job_cancel(job_id)? {
        return Err(Error::Job(format!("job {} is not active ({})", job_id, job.status)));
    }
    info!("Cancellation requested for job {}", job_id);
    fetch_job(db, job_id)
}

/// Re-open a cancelled or failed job so `run_job` continues from its checkpoint
///
/// An already-active job is returned as is.
pub fn resume(db: &Database, job_id: i64) -> Result<RecategorizeJob> {
    let job = fetch_job(db, job_id)?;

    match job.status {
        JobStatus::Pending | JobStatus::Running => return Ok(job),
        JobStatus::Completed => {
            return Err(Error::Job(format!("job {} already completed", job_id)));
        }
        JobStatus::Cancelled | JobStatus::Failed => {}
    }

    if let Some(active) = db.find_active_job(job.user_id)? {
        return Err(Error::Job(format!(
            "user {} already has active job {}",
            job.user_id, active.id
        )));
    }

    if !db.reopen_job(job_id)? {
        return Err(Error::Job(format!("job {} could not be reopened", job_id)));
    }
    info!("Job {} reopened at checkpoint {}", job_id, job.checkpoint_id);
    fetch_job(db, job_id)
}

fn fetch_job(db: &Database, job_id: i64) -> Result<RecategorizeJob> {
    db.get_job(job_id)?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategorizationMethod, Category, NewTransaction};
    use crate::policy::ReviewPolicy;
    use crate::rules::RuleTable;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;

    fn seed(db: &Database, user_id: i64, descriptions: &[&str]) -> Vec<i64> {
        descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                db.insert_transaction(
                    user_id,
                    &NewTransaction {
                        date: NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                        description: d.to_string(),
                        amount: -10.0,
                        merchant_name: None,
                        external_id: None,
                    },
                )
                .unwrap()
                .id()
            })
            .collect()
    }

    #[test]
    fn test_start_flags_active_job_for_restart() {
        let db = Database::in_memory().unwrap();
        seed(&db, 1, &["ACME"]);

        let first = start_recategorize(&db, 1).unwrap();
        assert!(!first.restart_requested);
        request_cancel(&db, first.id).unwrap();

        let second = start_recategorize(&db, 1).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.total, 1);
        assert!(second.restart_requested);
        // The newer request wins over the pending cancellation
        assert!(!second.cancel_requested);

        let other_user = start_recategorize(&db, 2).unwrap();
        assert_ne!(other_user.id, first.id);
        assert!(!other_user.restart_requested);
    }

    #[tokio::test]
    async fn test_restart_requested_mid_run_rewinds() {
        let db = Database::in_memory().unwrap();
        let rules = RuleTable::embedded().unwrap();
        let ids = seed(&db, 1, &["ACME TOOLS 1", "B TWO", "ACME TOOLS 3", "D FOUR"]);
        let categorizer = Categorizer::new(&db, &rules, None, ReviewPolicy::default());
        let job = start_recategorize(&db, 1).unwrap();

        // After the first batch, a correction lands and the user asks again
        let restart_db = db.clone();
        let requested = Arc::new(AtomicBool::new(false));
        let requested_cb = requested.clone();
        let calls = Arc::new(AtomicI64::new(0));
        let calls_cb = calls.clone();
        let progress: ProgressCallback = Box::new(move |_, _| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            if !requested_cb.swap(true, Ordering::SeqCst) {
                restart_db
                    .upsert_learned_pattern(1, "acme tools", Category::Equipment, None)
                    .unwrap();
                start_recategorize(&restart_db, 1).unwrap();
            }
        });

        let done = run_job(&db, &categorizer, job.id, 2, Some(&progress))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(!done.restart_requested);
        assert_eq!(done.processed, 4);
        assert_eq!(done.breakdown.by_learned, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let first = db.get_transaction(1, ids[0]).unwrap().unwrap();
        assert_eq!(first.category, Some(Category::Equipment));
        assert_eq!(db.list_jobs(1, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_job_applies_learned_patterns_to_history() {
        let db = Database::in_memory().unwrap();
        let rules = RuleTable::embedded().unwrap();
        let ids = seed(
            &db,
            1,
            &["ACME TOOLS 1", "GUSTO PAYROLL", "ACME TOOLS 2", "QWERTY"],
        );
        db.upsert_learned_pattern(1, "acme tools", Category::Equipment, None)
            .unwrap();

        let categorizer = Categorizer::new(&db, &rules, None, ReviewPolicy::default());
        let job = start_recategorize(&db, 1).unwrap();

        let calls = Arc::new(AtomicI64::new(0));
        let calls_cb = calls.clone();
        let progress: ProgressCallback = Box::new(move |_, _| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        });

        let done = run_job(&db, &categorizer, job.id, 2, Some(&progress))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed, 4);
        assert_eq!(done.checkpoint_id, ids[3]);
        assert_eq!(done.breakdown.by_learned, 2);
        assert_eq!(done.breakdown.by_rule, 1);
        assert_eq!(done.breakdown.fallback_to_other, 1);
        assert!(done.completed_at.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let tx = db.get_transaction(1, ids[2]).unwrap().unwrap();
        assert_eq!(tx.category, Some(Category::Equipment));
        assert_eq!(
            tx.categorization_method,
            Some(CategorizationMethod::LearnedPattern)
        );

        // Finished jobs can't be run again
        assert!(matches!(
            run_job(&db, &categorizer, job.id, 2, None).await,
            Err(Error::Job(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_then_resume_from_checkpoint() {
        let db = Database::in_memory().unwrap();
        let rules = RuleTable::embedded().unwrap();
        let ids = seed(&db, 1, &["A ONE", "B TWO", "C THREE"]);
        let categorizer = Categorizer::new(&db, &rules, None, ReviewPolicy::default());

        let job = start_recategorize(&db, 1).unwrap();
        // Simulate an earlier run that stopped after the first transaction
        db.mark_job_running(job.id, 3).unwrap();
        db.save_job_checkpoint(job.id, ids[0], 1, &Default::default())
            .unwrap();

        request_cancel(&db, job.id).unwrap();
        let cancelled = run_job(&db, &categorizer, job.id, 10, None).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.processed, 1);

        assert!(matches!(request_cancel(&db, job.id), Err(Error::Job(_))));

        let reopened = resume(&db, job.id).unwrap();
        assert_eq!(reopened.status, JobStatus::Pending);
        assert_eq!(reopened.checkpoint_id, ids[0]);

        let done = run_job(&db, &categorizer, job.id, 10, None).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed, 3);
        assert_eq!(done.total, 3);
        // The first transaction was never touched by this job
        assert!(db.get_transaction(1, ids[0]).unwrap().unwrap().category.is_none());
        assert!(db.get_transaction(1, ids[2]).unwrap().unwrap().category.is_some());

        assert!(matches!(resume(&db, job.id), Err(Error::Job(_))));
    }

    #[test]
    fn test_resume_refuses_second_active_job() {
        let db = Database::in_memory().unwrap();
        let old = db.create_job(1, 0).unwrap();
        db.finish_job(old, JobStatus::Failed, Some("boom")).unwrap();
        start_recategorize(&db, 1).unwrap();

        assert!(matches!(resume(&db, old), Err(Error::Job(_))));
        assert!(matches!(resume(&db, 999), Err(Error::NotFound(_))));
    }
}
