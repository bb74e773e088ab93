//! Error taxonomy.
//!
//! `EngineError` values are recovered inside the engine and recorded on the
//! query trace; they never reach the caller as failures. `ConfigError` is the
//! only error surfaced to callers, at construction time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum EngineError {
    /// A bare number matched more than one document family.
    #[error("reference '{raw}' is ambiguous between {candidates:?}")]
    ClassificationAmbiguous { raw: String, candidates: Vec<String> },

    /// One document-type partition of a retrieval failed or timed out.
    #[error("retrieval partition '{partition}' failed: {message}")]
    RetrievalPartitionFailed { partition: String, message: String },

    /// No partition of a retrieval could be reached.
    #[error("all {attempted} retrieval partitions failed")]
    RetrievalTotalFailure { attempted: usize },

    /// The embedding capability failed; retrieval degrades to lexical-only.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
}

impl From<regex::Error> for ConfigError {
    fn from(e: regex::Error) -> Self {
        ConfigError::Pattern(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown document type '{document_type}' for family '{prefix}'")]
    UnknownDocumentType { prefix: String, document_type: String },

    #[error("family prefix '{0}' is declared more than once")]
    DuplicateFamily(String),

    #[error("family '{prefix}' has an invalid number range {min}..={max}")]
    InvalidRange { prefix: String, min: u32, max: u32 },

    #[error("family prefix must be non-empty ASCII letters, got '{0}'")]
    InvalidPrefix(String),

    #[error("{field} must be in [0.0, 1.0], got {value}")]
    OutOfUnitRange { field: String, value: f32 },

    #[error("{0} must be > 0")]
    Zero(String),

    #[error("invalid keyword pattern: {0}")]
    Pattern(String),
}
