//! Error types for the preparation pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PrepError>;

/// Main error type for the preparation pipeline
#[derive(Error, Debug)]
pub enum PrepError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context source '{source_name}' failed: {message}")]
    ContextSource {
        source_name: String,
        message: String,
    },

    #[error("Metadata generation error: {0}")]
    MetadataGeneration(String),

    #[error("Relationship discovery error: {0}")]
    RelationshipDiscovery(String),

    #[error("Document validation failed: {}", .errors.join("; "))]
    DocumentValidation { errors: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline deadline of {0} ms exceeded")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "openai")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "openai"))]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification handed to synchronous callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputValidation,
    ContextSource,
    MetadataGeneration,
    RelationshipDiscovery,
    DocumentValidation,
    Storage,
    Llm,
    Cache,
    Queue,
    Config,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputValidation => "input_validation",
            ErrorKind::ContextSource => "context_source",
            ErrorKind::MetadataGeneration => "metadata_generation",
            ErrorKind::RelationshipDiscovery => "relationship_discovery",
            ErrorKind::DocumentValidation => "document_validation",
            ErrorKind::Storage => "storage",
            ErrorKind::Llm => "llm",
            ErrorKind::Cache => "cache",
            ErrorKind::Queue => "queue",
            ErrorKind::Config => "config",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl PrepError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrepError::InvalidInput(_) => ErrorKind::InputValidation,
            PrepError::ContextSource { .. } => ErrorKind::ContextSource,
            PrepError::MetadataGeneration(_) => ErrorKind::MetadataGeneration,
            PrepError::RelationshipDiscovery(_) => ErrorKind::RelationshipDiscovery,
            PrepError::DocumentValidation { .. } => ErrorKind::DocumentValidation,
            PrepError::Storage(_) => ErrorKind::Storage,
            PrepError::Llm(_) | PrepError::Http(_) => ErrorKind::Llm,
            PrepError::Cache(_) => ErrorKind::Cache,
            PrepError::Queue(_) => ErrorKind::Queue,
            PrepError::Config(_) => ErrorKind::Config,
            PrepError::Timeout(_) => ErrorKind::Timeout,
            PrepError::Serialization(_) | PrepError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PrepError::Storage(_)
                | PrepError::Llm(_)
                | PrepError::Http(_)
                | PrepError::Queue(_)
                | PrepError::Timeout(_)
        )
    }

    /// Stable numeric code per error kind
    pub fn code(&self) -> i64 {
        match self.kind() {
            ErrorKind::InputValidation => -32602,
            ErrorKind::DocumentValidation => -32010,
            ErrorKind::Storage => -32011,
            ErrorKind::Timeout => -32012,
            ErrorKind::Config => -32013,
            _ => -32000,
        }
    }
}
