//! Keyset cursor over intake tokens.
//!
//! Candidate tokens are visited in `(created_at, token)` order. The cursor
//! stores the position of the last token of the last committed page, so the
//! next page starts strictly after it even when many tokens share a
//! timestamp.
//!
//! # Timestamp Precision
//!
//! Cursors encode timestamps as milliseconds. Token timestamps must be
//! stored at millisecond precision (see [`truncate_to_millis`]) or the
//! decoded cursor would not compare equal to the stored value, which matters
//! for SQLite where DateTime is stored as TEXT.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CandidateToken;

/// Error type for cursor operations.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("invalid cursor format")]
    InvalidFormat,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid timestamp in cursor")]
    InvalidTimestamp,
    #[error("empty token in cursor")]
    EmptyToken,
}

/// Position after the last processed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCursor {
    pub created_at: DateTime<Utc>,
    pub token: String,
}

impl TokenCursor {
    pub fn new(created_at: DateTime<Utc>, token: impl Into<String>) -> Self {
        Self {
            created_at,
            token: token.into(),
        }
    }

    /// Cursor positioned at `candidate`.
    pub fn after(candidate: &CandidateToken) -> Self {
        Self::new(candidate.created_at, candidate.token.clone())
    }

    /// Encode the cursor as a URL-safe base64 string.
    ///
    /// Format: `{timestamp_millis}:{token}` encoded as base64.
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_millis(), self.token);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Decode a cursor from a base64 string.
    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;

        // The timestamp never contains ':', so the first one separates the
        // parts even if the token itself contains colons.
        let (timestamp_str, token) = raw.split_once(':').ok_or(CursorError::InvalidFormat)?;

        let timestamp_millis: i64 = timestamp_str
            .parse()
            .map_err(|_| CursorError::InvalidTimestamp)?;

        let created_at = DateTime::from_timestamp_millis(timestamp_millis)
            .ok_or(CursorError::InvalidTimestamp)?;

        if token.is_empty() {
            return Err(CursorError::EmptyToken);
        }

        Ok(Self::new(created_at, token))
    }
}

impl std::fmt::Display for TokenCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl std::str::FromStr for TokenCursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for TokenCursor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for TokenCursor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenCursor::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Truncate a DateTime to millisecond precision.
///
/// Token timestamps written at higher precision would not round-trip through
/// an encoded cursor.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}
