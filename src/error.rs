//! Error types for skein

use thiserror::Error;

/// Errors that can occur in the knowledge store
#[derive(Debug, Error)]
pub enum SkeinError {
    /// Referenced node, edge or connector does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Disallowed type/relation, dimension mismatch, self-loop edge
    #[error("Validation error: {0}")]
    Validation(String),

    /// Embedding adapter failed or is unreachable
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// One or more records failed during a sync run
    #[error("Sync partially failed: {failed} record(s) failed")]
    SyncPartialFailure { failed: usize },

    /// SQLite error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error (config, frontmatter)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),
}

impl SkeinError {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the caller can fix this by correcting its input
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Validation(_))
    }
}

/// Result type for skein operations
pub type Result<T> = std::result::Result<T, SkeinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(SkeinError::not_found("node x").is_caller_error());
        assert!(SkeinError::validation("self-loop").is_caller_error());
        assert!(!SkeinError::embedding("offline").is_caller_error());
        assert!(!SkeinError::config("bad weight").is_caller_error());
    }

    #[test]
    fn test_display() {
        let err = SkeinError::not_found("node abc");
        assert_eq!(err.to_string(), "Not found: node abc");
        let err = SkeinError::SyncPartialFailure { failed: 2 };
        assert_eq!(err.to_string(), "Sync partially failed: 2 record(s) failed");
    }
}
