use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database error codes that indicate contention or an interrupted
/// connection rather than a problem with the statement itself.
///
/// PostgreSQL: serialization_failure, deadlock_detected, lock_not_available,
/// query_canceled (statement_timeout), admin_shutdown, cannot_connect_now.
/// SQLite (extended result codes): BUSY, LOCKED, BUSY_RECOVERY,
/// LOCKED_SHAREDCACHE, BUSY_SNAPSHOT.
#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
const TRANSIENT_CODES: &[&str] = &[
    "40001", "40P01", "55P03", "57014", "57P01", "57P03", "5", "6", "261", "262", "517",
];

impl DbError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Constraint violations, decode failures and configuration problems are
    /// permanent; timeouts, lock conflicts and lost connections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
            DbError::Sqlx(e) => is_transient_sqlx(e),
            _ => false,
        }
    }
}

#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_CODES.contains(&&*code)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_permanent() {
        assert!(!DbError::NotConfigured.is_transient());
        assert!(!DbError::Internal("boom".into()).is_transient());
    }

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(DbError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[test]
    fn test_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(DbError::Sqlx(sqlx::Error::Io(io)).is_transient());
    }

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[test]
    fn test_row_not_found_is_permanent() {
        assert!(!DbError::Sqlx(sqlx::Error::RowNotFound).is_transient());
    }

    #[cfg(feature = "database-sqlite")]
    #[tokio::test]
    async fn test_constraint_violation_is_permanent() {
        let pool = crate::db::tests::harness::create_sqlite_pool().await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap();

        let err = sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&pool)
            .await
            .unwrap_err();
        assert!(!DbError::from(err).is_transient());
    }
}
