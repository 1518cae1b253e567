use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::JobRepo,
    },
    models::{JobOutcome, JobRecord},
};

pub struct PostgresJobRepo {
    pool: PgPool,
}

impl PostgresJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepo for PostgresJobRepo {
    async fn upsert_status(
        &self,
        id: Uuid,
        status: JobOutcome,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cleanup_jobs (id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
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
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(JobRecord {
                id: row.get("id"),
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
