use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One scheduled invocation of the cleanup.
///
/// The scheduler owns the id; `invoked_at` anchors the retention cutoff for
/// the whole run so a long run has a single, stable boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub invoked_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(id: Uuid, invoked_at: DateTime<Utc>) -> Self {
        Self { id, invoked_at }
    }

    /// A descriptor with a fresh id, invoked now.
    pub fn now() -> Self {
        Self::new(Uuid::new_v4(), Utc::now())
    }
}

/// Status of a cleanup job as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Heartbeat written when a run starts.
    InProgress,
    Completed,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::InProgress => "in_progress",
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::InProgress)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(JobOutcome::InProgress),
            "completed" => Ok(JobOutcome::Completed),
            "failed" => Ok(JobOutcome::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A row of the `cleanup_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobOutcome,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
