use std::sync::Arc;

use super::{CleanupEngine, JobStatusReporter, run_job};
use crate::models::JobDescriptor;

/// Runs a cleanup job every `interval_hours` until the task is cancelled.
///
/// For deployments without an external scheduler. A failed run is logged
/// and the next one starts from the beginning of the candidate set.
pub async fn start_cleanup_worker(
    engine: Arc<CleanupEngine>,
    reporter: Arc<dyn JobStatusReporter>,
) {
    let config = engine.config();
    let interval = config.interval();

    tracing::info!(
        interval_hours = config.interval_hours,
        retention_days = config.retention_days,
        page_size = config.batch.page_size,
        dry_run = config.safety.dry_run,
        "Starting intake cleanup worker{}",
        if config.safety.dry_run { " (DRY RUN)" } else { "" }
    );

    loop {
        let job = JobDescriptor::now();
        match run_job(&engine, reporter.as_ref(), &job, None).await {
            Ok(summary) => {
                if summary.total_deleted() > 0 {
                    tracing::info!(
                        job_id = %job.id,
                        total = summary.total_deleted(),
                        truncated = summary.truncated,
                        "Cleanup job complete"
                    );
                } else {
                    tracing::debug!(job_id = %job.id, "Cleanup job complete, nothing to delete");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Cleanup job failed");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
