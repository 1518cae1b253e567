use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Classification;
use crate::{
    db::{DbResult, IntakeRepo},
    models::{CandidateToken, PageDeletion},
    observability::metrics,
};

/// Removes one page of candidates and their dependent rows in a single
/// transaction. The only component that writes.
pub struct CascadeDeleter {
    repo: Arc<dyn IntakeRepo>,
    dry_run: bool,
}

impl CascadeDeleter {
    pub fn new(repo: Arc<dyn IntakeRepo>, dry_run: bool) -> Self {
        Self { repo, dry_run }
    }

    pub async fn delete(
        &self,
        page: &[CandidateToken],
        classification: &Classification,
        cutoff: DateTime<Utc>,
    ) -> DbResult<PageDeletion> {
        let plan = classification.plan(page);
        let deletion = self.repo.delete_page(&plan, cutoff, !self.dry_run).await?;

        if !deletion.preserved_entities.is_empty() {
            tracing::info!(
                entities = ?deletion.preserved_entities,
                "Entities gained a reference after classification, keeping them"
            );
        }

        if !deletion.rolled_back {
            metrics::record_cleanup_deletion("corpus_items", deletion.corpus_items);
            metrics::record_cleanup_deletion("relationships", deletion.relationships);
            metrics::record_cleanup_deletion("intake_tokens", deletion.tokens);
            metrics::record_cleanup_deletion("entities", deletion.entities);
        }

        Ok(deletion)
    }
}
