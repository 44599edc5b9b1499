//! Identity types for lexitree entities

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identifier of a document version in the flat store.
///
/// Identifiers are opaque strings (`LEGITEXT…`, `LEGISCTA…`, `LEGIARTI…` in the
/// LEGI corpus) and are stable across re-ingestion of the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of an invalidation mark (UUIDv7, sortable by creation time).
pub type MarkId = Uuid;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 mark id.
pub fn new_mark_id() -> MarkId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// End date used by the upstream feed for versions that have no end.
pub fn open_ended_sentinel() -> NaiveDate {
    NaiveDate::from_ymd_opt(2999, 1, 1).unwrap_or(NaiveDate::MAX)
}
