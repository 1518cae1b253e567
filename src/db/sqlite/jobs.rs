use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::JobRepo,
    },
    models::{JobOutcome, JobRecord},
};

pub struct SqliteJobRepo {
    pool: SqlitePool,
}

impl SqliteJobRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepo for SqliteJobRepo {
    async fn upsert_status(
        &self,
        id: Uuid,
        status: JobOutcome,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cleanup_jobs (id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<JobRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, status, created_at, updated_at
            FROM cleanup_jobs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(JobRecord {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                status: row
                    .get::<String, _>("status")
                    .parse()
                    .map_err(DbError::Internal)?,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }
}
