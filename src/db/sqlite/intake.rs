use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::common::{parse_optional_uuid, parse_uuid, placeholders};
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

pub struct SqliteIntakeRepo {
    pool: SqlitePool,
}

impl SqliteIntakeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Reference counts for `entity_ids`, run on an explicit connection so the
/// same query serves the classifier (pool) and the re-check (transaction).
async fn entity_references_on(
    conn: &mut SqliteConnection,
    entity_ids: &[Uuid],
    page_tokens: &[String],
) -> DbResult<Vec<EntityReferences>> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }

    let outside_page = if page_tokens.is_empty() {
        "1 = 1".to_string()
    } else {
        format!("t.token NOT IN ({})", placeholders(page_tokens.len()))
    };

    let query = format!(
        r#"
        SELECT
            e.id,
            (
                SELECT COUNT(*) FROM intake_tokens t
                WHERE t.entity_id = e.id
                  AND (t.completed_at IS NOT NULL OR {outside_page})
            ) AS other_tokens,
            (
                SELECT COUNT(*) FROM relationships r
                WHERE r.entity_id = e.id AND r.status <> ?
            ) AS resolved_relationships
        FROM entities e
        WHERE e.id IN ({})
        ORDER BY e.id
        "#,
        placeholders(entity_ids.len())
    );

    let mut query_builder = sqlx::query(&query);
    for token in page_tokens {
        query_builder = query_builder.bind(token);
    }
    query_builder = query_builder.bind(NEW_RELATIONSHIP_STATUS);
    for id in entity_ids {
        query_builder = query_builder.bind(id.to_string());
    }

    let rows = query_builder.fetch_all(&mut *conn).await?;

    rows.into_iter()
        .map(|row| {
            Ok(EntityReferences {
                entity_id: parse_uuid(&row.get::<String, _>("id"))?,
                other_tokens: row.get("other_tokens"),
                resolved_relationships: row.get("resolved_relationships"),
            })
        })
        .collect()
}

/// `DELETE ... WHERE {column} IN (...)` over a list of UUIDs.
async fn delete_by_ids(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    ids: &[Uuid],
) -> DbResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let query = format!(
        "DELETE FROM {table} WHERE {column} IN ({})",
        placeholders(ids.len())
    );
    let mut query_builder = sqlx::query(&query);
    for id in ids {
        query_builder = query_builder.bind(id.to_string());
    }

    Ok(query_builder.execute(&mut *conn).await?.rows_affected())
}

#[async_trait]
impl IntakeRepo for SqliteIntakeRepo {
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
                      AND created_at < ?
                      AND (created_at, token) > (?, ?)
                    ORDER BY created_at ASC, token ASC
                    LIMIT ?
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
                    WHERE completed_at IS NULL AND created_at < ?
                    ORDER BY created_at ASC, token ASC
                    LIMIT ?
                    "#,
                )
                .bind(cutoff)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| {
                Ok(CandidateToken {
                    token: row.get("token"),
                    entity_id: parse_optional_uuid(row.get("entity_id"))?,
                    product_id: parse_optional_uuid(row.get("product_id"))?,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn count_expired_tokens(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM intake_tokens WHERE completed_at IS NULL AND created_at < ?",
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

        let values = vec!["(?, ?)"; pairs.len()].join(", ");
        let query = format!(
            r#"
            SELECT r.id FROM relationships r
            WHERE r.status = ?
              AND (r.product_id, r.entity_id) IN (VALUES {values})
              AND NOT EXISTS (
                  SELECT 1 FROM intake_tokens t
                  WHERE t.entity_id = r.entity_id
                    AND (t.completed_at IS NOT NULL OR t.created_at >= ?)
              )
            ORDER BY r.id
            "#
        );

        let mut query_builder = sqlx::query(&query).bind(NEW_RELATIONSHIP_STATUS);
        for pair in pairs {
            query_builder = query_builder
                .bind(pair.product_id.to_string())
                .bind(pair.entity_id.to_string());
        }
        query_builder = query_builder.bind(cutoff);

        let rows = query_builder.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect()
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

        // 0. Re-check entity liveness against the state this transaction sees
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
        deletion.corpus_items =
            delete_by_ids(&mut tx, "corpus_items", "entity_id", &confirmed).await?;

        // 2. Eligible relationships plus the stale `new` relationships of
        // confirmed entities. A live token on the entity keeps them all.
        let mut matches = Vec::new();
        if !plan.relationship_ids.is_empty() {
            matches.push(format!("id IN ({})", placeholders(plan.relationship_ids.len())));
        }
        if !confirmed.is_empty() {
            matches.push(format!("entity_id IN ({})", placeholders(confirmed.len())));
        }
        if !matches.is_empty() {
            let query = format!(
                r#"
                DELETE FROM relationships
                WHERE status = ?
                  AND ({})
                  AND NOT EXISTS (
                      SELECT 1 FROM intake_tokens t
                      WHERE t.entity_id = relationships.entity_id
                        AND (t.completed_at IS NOT NULL OR t.created_at >= ?)
                  )
                "#,
                matches.join(" OR ")
            );
            let mut query_builder = sqlx::query(&query).bind(NEW_RELATIONSHIP_STATUS);
            for id in plan.relationship_ids.iter().chain(confirmed.iter()) {
                query_builder = query_builder.bind(id.to_string());
            }
            deletion.relationships = query_builder
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        // 3. Tokens, unless completed since the page was read
        if !plan.tokens.is_empty() {
            let query = format!(
                r#"
                DELETE FROM intake_tokens
                WHERE token IN ({})
                  AND completed_at IS NULL
                  AND created_at < ?
                "#,
                placeholders(plan.tokens.len())
            );
            let mut query_builder = sqlx::query(&query);
            for token in &plan.tokens {
                query_builder = query_builder.bind(token);
            }
            deletion.tokens = query_builder
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        // 4. Entities
        deletion.entities = delete_by_ids(&mut tx, "entities", "id", &confirmed).await?;

        if commit {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
            deletion.rolled_back = true;
        }

        Ok(deletion)
    }
}
