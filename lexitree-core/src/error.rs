//! Error types for lexitree operations

use crate::{DocumentId, DocumentKind};
use thiserror::Error;

/// Document store and cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Document store unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("Document store query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Cache operation failed: {reason}")]
    CacheFailure { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// NotFound for a document of a known kind.
    pub fn document_not_found(kind: DocumentKind, id: &DocumentId) -> Self {
        StorageError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// NotFound for an identifier whose kind is not known yet.
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        StorageError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Malformed date for {field}: {value}")]
    MalformedDate { field: String, value: String },
}

/// Tree construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Build of {root_id} cut off at depth {depth}")]
    DepthCutoff { root_id: String, depth: usize },

    #[error("Build of {root_id} timed out after {elapsed_ms}ms")]
    Timeout { root_id: String, elapsed_ms: u64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all lexitree errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LexError {
    /// Whether a caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LexError::Storage(StorageError::UpstreamUnavailable { .. })
                | LexError::Build(BuildError::Timeout { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LexError::Storage(StorageError::NotFound { .. }))
    }

    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(
            self,
            LexError::Storage(StorageError::UpstreamUnavailable { .. })
        )
    }
}

/// Result type alias for lexitree operations.
pub type LexResult<T> = Result<T, LexError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::document_not_found(
            DocumentKind::Container,
            &DocumentId::new("LEGITEXT000006070721"),
        );
        let msg = format!("{}", err);
        assert!(msg.contains("Not found"));
        assert!(msg.contains("texte"));
        assert!(msg.contains("LEGITEXT000006070721"));
    }

    #[test]
    fn test_validation_error_display_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "depth".to_string(),
            value: 11,
            min: 1,
            max: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("depth"));
        assert!(msg.contains("11"));
        assert!(msg.contains("[1, 10]"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_depth".to_string(),
            value: "0".to_string(),
            reason: "must be between 1 and 10".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_depth"));
        assert!(msg.contains("must be between 1 and 10"));
    }

    #[test]
    fn test_build_error_display_timeout() {
        let err = BuildError::Timeout {
            root_id: "LEGITEXT1".to_string(),
            elapsed_ms: 300_000,
        };
        assert!(err.to_string().contains("300000ms"));
    }

    #[test]
    fn test_lex_error_from_variants() {
        let storage = LexError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, LexError::Storage(_)));

        let validation = LexError::from(ValidationError::InvalidValue {
            field: "page".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(validation, LexError::Validation(_)));

        let build = LexError::from(BuildError::DepthCutoff {
            root_id: "R".to_string(),
            depth: 10,
        });
        assert!(matches!(build, LexError::Build(_)));

        let config = LexError::from(ConfigError::MissingRequired {
            field: "db".to_string(),
        });
        assert!(matches!(config, LexError::Config(_)));
    }

    #[test]
    fn test_retryable_classification() {
        let upstream = LexError::from(StorageError::UpstreamUnavailable {
            reason: "connection refused".to_string(),
        });
        assert!(upstream.is_retryable());
        assert!(upstream.is_upstream_unavailable());

        let timeout = LexError::from(BuildError::Timeout {
            root_id: "R".to_string(),
            elapsed_ms: 10,
        });
        assert!(timeout.is_retryable());

        let not_found = LexError::from(StorageError::not_found("root", "R"));
        assert!(!not_found.is_retryable());
        assert!(not_found.is_not_found());
    }
}
