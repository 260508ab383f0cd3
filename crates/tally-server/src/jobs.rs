//! Background runners for bulk re-categorization jobs

use std::sync::Arc;

use tracing::{error, info};

use tally_core::recategorize;

use crate::AppState;

/// Run a job on the tokio runtime
///
/// Returns false when this process already has a runner for the job.
pub fn spawn_job(state: Arc<AppState>, job_id: i64) -> bool {
    if !state.claim_job(job_id) {
        info!("Job {} already has a runner", job_id);
        return false;
    }

    tokio::spawn(async move {
        let outcome = match state.categorizer() {
            Ok(categorizer) => recategorize::run_job(
                &state.db,
                &categorizer,
                job_id,
                state.engine.batch_size,
                None,
            )
            .await
            .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(job) => info!("Background job {} finished: {}", job_id, job.status),
            Err(e) => error!("Background job {} failed: {}", job_id, e),
        }

        state.release_job(job_id);
    });

    true
}

/// Restart jobs a previous process left pending or running
pub fn resume_unfinished_jobs(state: &Arc<AppState>) -> anyhow::Result<usize> {
    let jobs = state.db.list_unfinished_jobs()?;
    let mut resumed = 0;
    for job in jobs {
        info!(
            "Resuming job {} for user {} at checkpoint {}",
            job.id, job.user_id, job.checkpoint_id
        );
        if spawn_job(state.clone(), job.id) {
            resumed += 1;
        }
    }
    Ok(resumed)
}
