//! Store capability consumed by the engine.
//!
//! The engine never talks to a concrete database. Any backend that can run a
//! filtered lexical+vector search and a predicate fetch implements
//! [`ChunkStore`]; [`InMemoryStore`] is the bundled implementation.

pub mod memory_store;

pub use memory_store::InMemoryStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{split_canonical_id, Chunk, DocumentType};

/// A single predicate evaluated by the store. Predicates are never combined;
/// type exclusions are applied by the engine as a separate post-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `document_id` equals one of the canonical ids.
    DocumentIds(Vec<String>),
    /// `document_id` of the family lies in `start..=end`.
    NumberRange { prefix: String, start: u32, end: u32 },
    /// `document_type` is one of the given types.
    DocumentTypes(Vec<DocumentType>),
}

impl Predicate {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Predicate::DocumentIds(ids) => chunk
                .document_id
                .as_ref()
                .is_some_and(|id| ids.iter().any(|wanted| wanted == id)),
            Predicate::NumberRange { prefix, start, end } => chunk
                .document_id
                .as_deref()
                .and_then(split_canonical_id)
                .is_some_and(|(p, n)| p == prefix && (*start..=*end).contains(&n)),
            Predicate::DocumentTypes(types) => types.contains(&chunk.document_type),
        }
    }

    /// SQL-style rendering for logs and traces.
    pub fn describe(&self) -> String {
        let quote = |s: &str| format!("'{}'", s.replace('\'', "''"));
        match self {
            Predicate::DocumentIds(ids) => format!(
                "document_id IN ({})",
                ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ")
            ),
            Predicate::NumberRange { prefix, start, end } => format!(
                "document_id BETWEEN {} AND {}",
                quote(&crate::types::canonical_id(prefix, *start)),
                quote(&crate::types::canonical_id(prefix, *end))
            ),
            Predicate::DocumentTypes(types) => format!(
                "document_type IN ({})",
                types.iter().map(|t| quote(t.as_str())).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Distance convention of the store's vector scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Cosine distance in [0, 2].
    Cosine,
    /// A distance already in [0, 1].
    UnitDistance,
    /// A similarity in [0, 1], higher is better.
    Similarity,
}

impl DistanceMetric {
    /// Map a raw vector score to a similarity in [0, 1].
    pub fn to_similarity(&self, raw: f32) -> f32 {
        let similarity = match self {
            DistanceMetric::Cosine => 1.0 - raw / 2.0,
            DistanceMetric::UnitDistance => 1.0 - raw,
            DistanceMetric::Similarity => raw,
        };
        if similarity.is_nan() {
            0.0
        } else {
            similarity.clamp(0.0, 1.0)
        }
    }
}

/// One candidate from a combined search. Either score may be missing.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub chunk: Chunk,
    pub lexical_score: Option<f32>,
    /// Raw vector score in the store's `DistanceMetric`.
    pub vector_distance: Option<f32>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Combined lexical and vector search restricted to `document_types`
    /// (all types when empty). Without a vector only lexical scores are set.
    async fn lexical_and_vector_search(
        &self,
        text: &str,
        vector: Option<&[f32]>,
        document_types: &[DocumentType],
        limit: usize,
    ) -> Result<Vec<StoreHit>>;

    /// All chunks matching the predicate, in store order.
    async fn fetch_by_predicate(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Chunk>>;

    fn distance_metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}
