use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse an optional UUID column.
pub fn parse_optional_uuid(s: Option<String>) -> DbResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// `?` placeholders for an `IN (...)` list of `n` values.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
