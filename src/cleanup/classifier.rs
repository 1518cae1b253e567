//! Liveness classification for one page of candidates.
//!
//! The classifier only reads. Its answer is advisory: the deleter repeats the
//! entity check inside its transaction, so a reference created between the
//! two is still honoured.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::{DbResult, IntakeRepo},
    models::{CandidateToken, DeletionPlan, ProductEntityPair},
};

/// What may be removed alongside a page's tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// `new` relationships of the page's pairs whose entity has no live token.
    pub relationship_ids: Vec<Uuid>,
    /// Entities with no reference outside the page.
    pub safe_entities: Vec<Uuid>,
    /// Referenced entities that must survive this page.
    pub preserved_entities: BTreeSet<Uuid>,
}

impl Classification {
    /// Build the deletion plan for `page`.
    pub fn plan(&self, page: &[CandidateToken]) -> DeletionPlan {
        DeletionPlan {
            tokens: page.iter().map(|c| c.token.clone()).collect(),
            relationship_ids: self.relationship_ids.clone(),
            entity_ids: self.safe_entities.clone(),
        }
    }
}

pub struct LivenessClassifier {
    repo: Arc<dyn IntakeRepo>,
}

impl LivenessClassifier {
    pub fn new(repo: Arc<dyn IntakeRepo>) -> Self {
        Self { repo }
    }

    /// Classify every entity and (product, entity) pair referenced by `page`.
    ///
    /// Issues one relationship query and one entity query for the whole page,
    /// concurrently.
    pub async fn classify(
        &self,
        page: &[CandidateToken],
        cutoff: DateTime<Utc>,
    ) -> DbResult<Classification> {
        let pairs: Vec<ProductEntityPair> = page
            .iter()
            .filter_map(CandidateToken::pair)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let entities: BTreeSet<Uuid> = page.iter().filter_map(|c| c.entity_id).collect();
        let entity_ids: Vec<Uuid> = entities.iter().copied().collect();
        let page_tokens: Vec<String> = page.iter().map(|c| c.token.clone()).collect();

        let (relationship_ids, references) = tokio::try_join!(
            self.repo.find_removable_relationships(&pairs, cutoff),
            self.repo.entity_references(&entity_ids, &page_tokens),
        )?;

        let safe_entities: Vec<Uuid> = references
            .iter()
            .filter(|r| !r.is_blocked())
            .map(|r| r.entity_id)
            .collect();
        let preserved_entities = entities
            .into_iter()
            .filter(|id| !safe_entities.contains(id))
            .collect();

        Ok(Classification {
            relationship_ids,
            safe_entities,
            preserved_entities,
        })
    }
}
