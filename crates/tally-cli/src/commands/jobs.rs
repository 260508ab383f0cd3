//! Bulk re-categorization commands
//!
//! The CLI runs jobs in the foreground. Ctrl+C requests cancellation, which
//! takes effect at the next batch boundary; `--resume` picks up from the
//! last checkpoint.

use anyhow::{Context, Result};
use tally_core::models::{JobStatus, RecategorizeJob};
use tally_core::recategorize;
use tally_core::{Database, ProgressCallback};
use tracing::warn;

use super::{print_breakdown_totals, Engine};

pub async fn cmd_recategorize(
    db: &Database,
    engine: &Engine,
    user_id: i64,
    resume: Option<i64>,
    batch_size: Option<i64>,
) -> Result<()> {
    let job = match resume {
        Some(id) => {
            let owner = db
                .get_job(id)?
                .with_context(|| format!("Job {} not found", id))?
                .user_id;
            if owner != user_id {
                anyhow::bail!("Job {} belongs to user {}", id, owner);
            }
            let job = recategorize::resume(db, id)
                .with_context(|| format!("Failed to resume job {}", id))?;
            println!(
                "🔁 Resuming job {} from checkpoint {} ({} done)",
                job.id, job.checkpoint_id, job.processed
            );
            job
        }
        None => {
            let job = recategorize::start_recategorize(db, user_id)?;
            if job.restart_requested {
                println!(
                    "🔁 Job {} was already active for user {}; restarting it from the beginning",
                    job.id, user_id
                );
            } else {
                println!(
                    "🔁 Re-categorizing {} transactions for user {} (job {})",
                    job.total, user_id, job.id
                );
            }
            job
        }
    };
    engine.describe();

    let batch_size = batch_size.unwrap_or(engine.config.batch_size).max(1);

    // Ctrl+C stops at the next batch boundary
    let cancel_db = db.clone();
    let job_id = job.id;
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("⏸️  Stopping after the current batch...");
            if let Err(e) = recategorize::request_cancel(&cancel_db, job_id) {
                warn!("Failed to request cancellation of job {}: {}", job_id, e);
            }
        }
    });

    let progress: ProgressCallback = Box::new(|done, total| {
        println!("   {}/{}", done, total);
    });

    let categorizer = engine.categorizer(db)?;
    let outcome =
        recategorize::run_job(db, &categorizer, job.id, batch_size, Some(&progress)).await;
    watcher.abort();

    let job = outcome.with_context(|| format!("Job {} failed", job_id))?;
    println!();
    print_job(&job);
    Ok(())
}

pub fn cmd_jobs_list(db: &Database, user_id: i64) -> Result<()> {
    let jobs = db.list_jobs(user_id, 20)?;

    if jobs.is_empty() {
        println!("No re-categorization jobs for user {}", user_id);
        return Ok(());
    }

    println!("📋 Jobs for user {}", user_id);
    println!();
    for job in &jobs {
        println!(
            "   #{:<5} {:<10} {:>6}/{:<6} {}",
            job.id,
            job.status.as_str(),
            job.processed,
            job.total,
            job.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn cmd_job_show(db: &Database, id: i64) -> Result<()> {
    let job = db
        .get_job(id)?
        .with_context(|| format!("Job {} not found", id))?;
    print_job(&job);
    Ok(())
}

pub fn cmd_job_cancel(db: &Database, id: i64) -> Result<()> {
    let job = recategorize::request_cancel(db, id)?;
    println!(
        "⏸️  Cancellation requested for job {} ({}/{} done)",
        job.id, job.processed, job.total
    );
    Ok(())
}

fn print_job(job: &RecategorizeJob) {
    let icon = match job.status {
        JobStatus::Completed => "✅",
        JobStatus::Cancelled => "⏸️ ",
        JobStatus::Failed => "❌",
        JobStatus::Pending | JobStatus::Running => "⏳",
    };
    println!("{} Job {} ({})", icon, job.id, job.status);
    println!("   User: {}", job.user_id);
    println!("   Progress: {}/{}", job.processed, job.total);
    println!("   Checkpoint: transaction {}", job.checkpoint_id);
    print_breakdown_totals(&job.breakdown);
    if let Some(ref error) = job.error {
        println!("   Error: {}", error);
    }
    if job.status.is_active() {
        println!("   Cancel with: tally jobs {} --cancel", job.id);
    } else if job.processed < job.total {
        println!(
            "   Resume with: tally recategorize --user {} --resume {}",
            job.user_id, job.id
        );
    }
}
