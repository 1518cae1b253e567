use std::time::Instant;

use tracing::Instrument;

use super::{CleanupEngine, CleanupError, JobStatusReporter, RunSummary};
use crate::{
    db::TokenCursor,
    models::{JobDescriptor, JobOutcome},
    observability::metrics,
};

/// Run one scheduled cleanup job and report its outcome.
///
/// Reports `in_progress` first, then exactly one terminal status. A failed
/// run is reported as `failed` before its error is returned. If the run
/// succeeds but `completed` cannot be recorded, [`CleanupError::Report`] is
/// returned.
pub async fn run_job(
    engine: &CleanupEngine,
    reporter: &dyn JobStatusReporter,
    job: &JobDescriptor,
    resume_from: Option<TokenCursor>,
) -> Result<RunSummary, CleanupError> {
    let span = tracing::info_span!("cleanup_job", job_id = %job.id);
    let started = Instant::now();

    async {
        if let Err(e) = reporter.report(job.id, JobOutcome::InProgress).await {
            tracing::warn!(error = %e, "Failed to record job heartbeat");
        }

        let cutoff = engine.config().cutoff(job.invoked_at);
        let result = engine.run(cutoff, resume_from).await;
        let duration_secs = started.elapsed().as_secs_f64();

        match result {
            Ok(summary) => {
                metrics::record_cleanup_run(JobOutcome::Completed.as_str(), duration_secs);
                match reporter.report(job.id, JobOutcome::Completed).await {
                    Ok(()) => Ok(summary),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to record job completion");
                        Err(CleanupError::Report(e))
                    }
                }
            }
            Err(e) => {
                metrics::record_cleanup_run(JobOutcome::Failed.as_str(), duration_secs);
                if let Err(report_error) = reporter.report(job.id, JobOutcome::Failed).await {
                    tracing::error!(error = %report_error, "Failed to record job failure");
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}
