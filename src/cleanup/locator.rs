use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    db::{DbResult, IntakeRepo, TokenCursor},
    models::CandidateToken,
};

/// Pages through expired, uncompleted tokens in `(created_at, token)` order.
pub struct CandidateLocator {
    repo: Arc<dyn IntakeRepo>,
}

impl CandidateLocator {
    pub fn new(repo: Arc<dyn IntakeRepo>) -> Self {
        Self { repo }
    }

    /// Up to `limit` candidates strictly after `cursor`. An empty page means
    /// the run has seen every candidate.
    pub async fn next_page(
        &self,
        cutoff: DateTime<Utc>,
        cursor: Option<&TokenCursor>,
        limit: u32,
    ) -> DbResult<Vec<CandidateToken>> {
        self.repo.list_expired_tokens(cutoff, cursor, limit).await
    }

    /// Number of candidates currently waiting behind `cutoff`.
    pub async fn pending(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        self.repo.count_expired_tokens(cutoff).await
    }
}
