use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::DbResult,
        repos::{IntakeRepo, TokenCursor},
    },
    models::{
        CandidateToken, DeletionPlan, EntityReferences, NEW_RELATIONSHIP_STATUS, PageDeletion,
        ProductEntityPair,
    },
};

pub struct PostgresIntakeRepo {
    pool: PgPool,
}

impl PostgresIntakeRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn entity_references_on(
    conn: &mut PgConnection,
    entity_ids: &[Uuid],
    page_tokens: &[String],
) -> DbResult<Vec<EntityReferences>> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }

    // `<> ALL('{}')` is true, so an empty page counts every token.
    let rows = sqlx::query(
        r#"
        SELECT
            e.id,
            (
                SELECT COUNT(*) FROM intake_tokens t
                WHERE t.entity_id = e.id
                  AND (t.completed_at IS NOT NULL OR t.token <> ALL($2))
            ) AS other_tokens,
            (
                SELECT COUNT(*) FROM relationships r
                WHERE r.entity_id = e.id AND r.status <> $3
            ) AS resolved_relationships
        FROM entities e
        WHERE e.id = ANY($1)
        ORDER BY e.id
        "#,
    )
    .bind(entity_ids)
    .bind(page_tokens)
    .bind(NEW_RELATIONSHIP_STATUS)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| EntityReferences {
            entity_id: row.get("id"),
            other_tokens: row.get("other_tokens"),
            resolved_relationships: row.get("resolved_relationships"),
        })
        .collect())
}

#[async_trait]
impl IntakeRepo for PostgresIntakeRepo {
    async fn list_expired_tokens(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&TokenCursor>,
        limit: u32,
    ) -> DbResult<Vec<CandidateToken>> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query(
                    r#"
                    SELECT token, entity_id, product_id, created_at
                    FROM intake_tokens
                    WHERE completed_at IS NULL
                      AND created_at < $1
                      AND ROW(created_at, token) > ROW($2, $3)
                    ORDER BY created_at ASC, token ASC
                    LIMIT $4
                    "#,
                )
                .bind(cutoff)
                .bind(cursor.created_at)
                .bind(&cursor.token)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT token, entity_id, product_id, created_at
                    FROM intake_tokens
                    WHERE completed_at IS NULL AND created_at < $1
                    ORDER BY created_at ASC, token ASC
                    LIMIT $2
                    "#,
                )
                .bind(cutoff)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| CandidateToken {
                token: row.get("token"),
                entity_id: row.get("entity_id"),
                product_id: row.get("product_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn count_expired_tokens(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM intake_tokens WHERE completed_at IS NULL AND created_at < $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_removable_relationships(
        &self,
        pairs: &[ProductEntityPair],
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<Uuid>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let (product_ids, entity_ids): (Vec<Uuid>, Vec<Uuid>) = pairs
            .iter()
            .map(|pair| (pair.product_id, pair.entity_id))
            .unzip();

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT r.id FROM relationships r
            WHERE r.status = $4
              AND (r.product_id, r.entity_id) IN (
                  SELECT * FROM UNNEST($1::uuid[], $2::uuid[])
              )
              AND NOT EXISTS (
                  SELECT 1 FROM intake_tokens t
                  WHERE t.entity_id = r.entity_id
                    AND (t.completed_at IS NOT NULL OR t.created_at >= $3)
              )
            ORDER BY r.id
            "#,
        )
        .bind(&product_ids)
        .bind(&entity_ids)
        .bind(cutoff)
        .bind(NEW_RELATIONSHIP_STATUS)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn entity_references(
        &self,
        entity_ids: &[Uuid],
        page_tokens: &[String],
    ) -> DbResult<Vec<EntityReferences>> {
        let mut conn = self.pool.acquire().await?;
        entity_references_on(&mut conn, entity_ids, page_tokens).await
    }

    async fn delete_page(
        &self,
        plan: &DeletionPlan,
        cutoff: DateTime<Utc>,
        commit: bool,
    ) -> DbResult<PageDeletion> {
        let mut tx = self.pool.begin().await?;
        let mut deletion = PageDeletion::default();

        // 0. Lock the candidate entities and the page's tokens so that new
        // references and concurrent completions wait for this transaction,
        // then re-check liveness under the locks.
        if !plan.entity_ids.is_empty() {
            sqlx::query("SELECT id FROM entities WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(&plan.entity_ids)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("SELECT token FROM intake_tokens WHERE token = ANY($1) ORDER BY token FOR UPDATE")
            .bind(&plan.tokens)
            .execute(&mut *tx)
            .await?;

        let references = entity_references_on(&mut tx, &plan.entity_ids, &plan.tokens).await?;
        let confirmed: Vec<Uuid> = references
            .iter()
            .filter(|r| !r.is_blocked())
            .map(|r| r.entity_id)
            .collect();
        deletion.preserved_entities = references
            .iter()
            .filter(|r| r.is_blocked())
            .map(|r| r.entity_id)
            .collect::<BTreeSet<_>>();

        // 1. Corpus items of confirmed entities
        deletion.corpus_items = sqlx::query("DELETE FROM corpus_items WHERE entity_id = ANY($1)")
            .bind(&confirmed)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // 2. Eligible relationships plus the stale `new` relationships of
        // confirmed entities. A live token on the entity keeps them all.
        deletion.relationships = sqlx::query(
            r#"
            DELETE FROM relationships r
            WHERE r.status = $4
              AND (r.id = ANY($1) OR r.entity_id = ANY($2))
              AND NOT EXISTS (
                  SELECT 1 FROM intake_tokens t
                  WHERE t.entity_id = r.entity_id
                    AND (t.completed_at IS NOT NULL OR t.created_at >= $3)
              )
            "#,
        )
        .bind(&plan.relationship_ids)
        .bind(&confirmed)
        .bind(cutoff)
        .bind(NEW_RELATIONSHIP_STATUS)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // 3. Tokens, unless completed since the page was read
        deletion.tokens = sqlx::query(
            r#"
            DELETE FROM intake_tokens
            WHERE token = ANY($1)
              AND completed_at IS NULL
              AND created_at < $2
            "#,
        )
        .bind(&plan.tokens)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // 4. Entities
        deletion.entities = sqlx::query("DELETE FROM entities WHERE id = ANY($1)")
            .bind(&confirmed)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if commit {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
            deletion.rolled_back = true;
        }

        Ok(deletion)
    }
}
