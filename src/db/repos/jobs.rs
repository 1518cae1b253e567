use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{JobOutcome, JobRecord},
};

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert the job or overwrite its status.
    async fn upsert_status(&self, id: Uuid, status: JobOutcome, at: DateTime<Utc>)
    -> DbResult<()>;

    /// Get a job by its ID.
    async fn get(&self, id: Uuid) -> DbResult<Option<JobRecord>>;
}
