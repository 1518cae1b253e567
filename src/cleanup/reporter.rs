use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::{DbResult, JobRepo},
    models::JobOutcome,
};

/// Records the status of a cleanup job for the scheduler.
#[async_trait]
pub trait JobStatusReporter: Send + Sync {
    async fn report(&self, job_id: Uuid, outcome: JobOutcome) -> DbResult<()>;
}

/// Writes job status to the `cleanup_jobs` table.
pub struct DbJobStatusReporter {
    jobs: Arc<dyn JobRepo>,
}

impl DbJobStatusReporter {
    pub fn new(jobs: Arc<dyn JobRepo>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl JobStatusReporter for DbJobStatusReporter {
    async fn report(&self, job_id: Uuid, outcome: JobOutcome) -> DbResult<()> {
        self.jobs.upsert_status(job_id, outcome, Utc::now()).await
    }
}

/// Only logs job status. For schedulers that read the process exit code.
pub struct LogReporter;

#[async_trait]
impl JobStatusReporter for LogReporter {
    async fn report(&self, job_id: Uuid, outcome: JobOutcome) -> DbResult<()> {
        tracing::info!(job_id = %job_id, outcome = %outcome, "Cleanup job status");
        Ok(())
    }
}
