use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::TokenCursor;
use crate::{
    db::error::DbResult,
    models::{CandidateToken, DeletionPlan, EntityReferences, PageDeletion, ProductEntityPair},
};

/// Store operations used by the expired intake cleanup.
///
/// A token is *live* when it is completed or was created at or after the
/// cutoff. Every query that decides what may be deleted treats live tokens
/// as blocking.
#[async_trait]
pub trait IntakeRepo: Send + Sync {
    /// List uncompleted tokens created strictly before `cutoff`, ordered by
    /// `(created_at, token)` and starting strictly after `after`.
    async fn list_expired_tokens(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&TokenCursor>,
        limit: u32,
    ) -> DbResult<Vec<CandidateToken>>;

    /// Count uncompleted tokens created strictly before `cutoff`.
    async fn count_expired_tokens(&self, cutoff: DateTime<Utc>) -> DbResult<i64>;

    /// IDs of `new` relationships matching one of `pairs` whose entity has no
    /// live token (completed, or created at or after `cutoff`) for any product.
    async fn find_removable_relationships(
        &self,
        pairs: &[ProductEntityPair],
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Uuid>>;

    /// Reference counts for each existing entity in `entity_ids`.
    ///
    /// Tokens listed in `page_tokens` are not counted unless they have been
    /// completed. Entities that no longer exist are omitted.
    async fn entity_references(
        &self,
        entity_ids: &[Uuid],
        page_tokens: &[String],
    ) -> DbResult<Vec<EntityReferences>>;

    /// Delete one page in a single transaction, children before parents.
    ///
    /// Entities are re-checked inside the transaction first; any that picked
    /// up a reference since classification are kept and reported in
    /// [`PageDeletion::preserved_entities`]. When `commit` is false the
    /// transaction is rolled back after all statements ran.
    async fn delete_page(
        &self,
        plan: &DeletionPlan,
        cutoff: DateTime<Utc>,
        commit: bool,
    ) -> DbResult<PageDeletion>;
}
