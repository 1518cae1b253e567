use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An expired, uncompleted public intake token, as selected by the candidate
/// query. Only the columns the cleanup needs are loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateToken {
    /// Opaque token handed to the anonymous intake session
    pub token: String,
    /// Entity created by the intake flow, if it got that far
    pub entity_id: Option<Uuid>,
    /// Product (form/offer) the intake was for
    pub product_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CandidateToken {
    /// The (product, entity) pair this token's relationship would use.
    pub fn pair(&self) -> Option<ProductEntityPair> {
        Some(ProductEntityPair {
            product_id: self.product_id?,
            entity_id: self.entity_id?,
        })
    }
}

/// Key used to match relationships to tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductEntityPair {
    pub product_id: Uuid,
    pub entity_id: Uuid,
}

/// Status of a relationship whose intake is still in progress. Any other
/// status is a resolved relationship that pins its entity.
pub const NEW_RELATIONSHIP_STATUS: &str = "new";

/// Reference counts that decide whether an entity may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityReferences {
    pub entity_id: Uuid,
    /// Tokens referencing the entity that are not part of the page being
    /// deleted, or that were completed since the page was fetched. Covers
    /// live tokens and expired siblings on later pages alike.
    pub other_tokens: i64,
    /// Relationships whose status is not `new`.
    pub resolved_relationships: i64,
}

impl EntityReferences {
    pub fn is_blocked(&self) -> bool {
        self.other_tokens > 0 || self.resolved_relationships > 0
    }
}

/// Everything the cascade deleter removes for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    /// Tokens of the page, in page order.
    pub tokens: Vec<String>,
    /// `new` relationships eligible for removal.
    pub relationship_ids: Vec<Uuid>,
    /// Entities classified safe; re-verified inside the transaction.
    pub entity_ids: Vec<Uuid>,
}

/// Rows removed by one page's transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDeletion {
    pub corpus_items: u64,
    pub relationships: u64,
    pub tokens: u64,
    pub entities: u64,
    /// Entities the plan marked safe but the in-transaction re-check kept.
    pub preserved_entities: BTreeSet<Uuid>,
    /// True when the transaction was rolled back on purpose (dry run).
    pub rolled_back: bool,
}

impl PageDeletion {
    pub fn total(&self) -> u64 {
        self.corpus_items + self.relationships + self.tokens + self.entities
    }
}
