//! Question answering over a governed document corpus: decision records,
//! principles, policies and their terminology.
//!
//! A [`QueryEngine`] classifies each question, resolves document references,
//! retrieves evidence through a pluggable [`storage::ChunkStore`], and either
//! answers or abstains with refinement suggestions. Every turn carries a
//! [`trace::QueryTrace`] explaining the decision.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod rag;
pub mod rag_engine;
pub mod search;
pub mod storage;
pub mod trace;
pub mod types;

// Re-export primary types for convenience
pub use config::EngineConfig;
pub use context::{ContextTracker, ConversationState};
pub use error::{ConfigError, EngineError};
pub use rag::{AbstentionReason, AnswerSynthesizer, GateDecision};
pub use rag_engine::{QueryEngine, QueryRequest, QueryResponse};
pub use storage::{ChunkStore, InMemoryStore, Predicate};
pub use trace::{QueryTrace, RetrievalPath};
pub use types::{
    Chunk, DocReference, DocumentType, Intent, Language, ReferenceRange, ResultProjection,
    RetrievalResult,
};

// Re-export common types
pub use anyhow::{Error, Result};
