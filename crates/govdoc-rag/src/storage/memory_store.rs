//! In-memory chunk store.
//!
//! Lexical scoring is the fraction of distinct query terms found in the
//! chunk's text, title or document id. Vector scores are cosine distances in
//! [0, 2]. Partitions can be marked as failing to exercise degraded paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ChunkStore, DistanceMetric, Predicate, StoreHit};
use crate::rag::normalize::tokens;
use crate::types::{Chunk, DocumentType};

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<Chunk>>,
    failing_types: RwLock<HashSet<DocumentType>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        let store = Self::new();
        store.insert(chunks);
        store
    }

    /// Append chunks; a chunk whose id already exists replaces the old one in place.
    pub fn insert(&self, chunks: Vec<Chunk>) {
        let mut stored = self.chunks.write();
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => stored.push(chunk),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }

    /// Make searches restricted to this document type fail.
    pub fn fail_partition(&self, document_type: DocumentType) {
        self.failing_types.write().insert(document_type);
    }

    /// Make every call fail, as an unreachable backend would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store is unavailable");
        }
        Ok(())
    }
}

/// Fraction of distinct query terms present in the chunk.
fn term_overlap(query_terms: &HashSet<String>, chunk: &Chunk) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {} {}",
        chunk.content,
        chunk.document_title,
        chunk.section_label,
        chunk.document_id.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    let chunk_terms: HashSet<&str> = tokens(&haystack).collect();
    let matched = query_terms
        .iter()
        .filter(|t| chunk_terms.contains(t.as_str()))
        .count();
    matched as f32 / query_terms.len() as f32
}

/// Cosine distance in [0, 2]; `None` for mismatched or zero vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut mag_a, mut mag_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f64::EPSILON {
        return None;
    }
    Some((1.0 - (dot / denom).clamp(-1.0, 1.0)) as f32)
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn lexical_and_vector_search(
        &self,
        text: &str,
        vector: Option<&[f32]>,
        document_types: &[DocumentType],
        limit: usize,
    ) -> Result<Vec<StoreHit>> {
        self.check_available()?;
        {
            let failing = self.failing_types.read();
            if let Some(t) = document_types.iter().find(|t| failing.contains(t)) {
                bail!("partition '{}' is unavailable", t);
            }
        }

        let lower = text.to_lowercase();
        let query_terms: HashSet<String> = tokens(&lower).map(str::to_string).collect();

        let chunks = self.chunks.read();
        let mut hits: Vec<(f32, StoreHit)> = chunks
            .iter()
            .filter(|c| document_types.is_empty() || document_types.contains(&c.document_type))
            .filter_map(|chunk| {
                let overlap = term_overlap(&query_terms, chunk);
                let lexical_score = (overlap > 0.0).then_some(overlap);
                let vector_distance = match (vector, chunk.embedding.as_deref()) {
                    (Some(query), Some(embedding)) => cosine_distance(query, embedding),
                    _ => None,
                };
                if lexical_score.is_none() && vector_distance.is_none() {
                    return None;
                }
                let rough = lexical_score.unwrap_or(0.0)
                    + vector_distance.map(|d| 1.0 - d / 2.0).unwrap_or(0.0);
                Some((
                    rough,
                    StoreHit {
                        chunk: chunk.clone(),
                        lexical_score,
                        vector_distance,
                    },
                ))
            })
            .collect();

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk.id.cmp(&b.1.chunk.id))
        });
        hits.truncate(limit);

        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    async fn fetch_by_predicate(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Chunk>> {
        self.check_available()?;
        if let Predicate::DocumentTypes(types) = predicate {
            let failing = self.failing_types.read();
            if let Some(t) = types.iter().find(|t| failing.contains(t)) {
                bail!("partition '{}' is unavailable", t);
            }
        }

        Ok(self
            .chunks
            .read()
            .iter()
            .filter(|c| predicate.matches(c))
            .take(limit)
            .cloned()
            .collect())
    }

    fn distance_metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryStore {
        InMemoryStore::with_chunks(vec![
            Chunk::new("adr-12-1", DocumentType::DecisionRecord, "We adopt an event bus for integration")
                .with_document("ADR.0012", "Event bus")
                .with_embedding(vec![1.0, 0.0]),
            Chunk::new("pcp-22-1", DocumentType::Principle, "Interoperability through open standards")
                .with_document("PCP.0022", "Open standards")
                .with_embedding(vec![0.0, 1.0]),
            Chunk::new("dar-1", DocumentType::ApprovalRecord, "Approval of the event bus decision")
                .with_document("DAR.0001", "Approval"),
        ])
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), Some(0.0));
        assert_eq!(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]), Some(2.0));
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 0.0]), None);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn test_lexical_search_respects_type_filter() {
        let store = store();
        let hits = store
            .lexical_and_vector_search("event bus", None, &[DocumentType::DecisionRecord], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "adr-12-1");
        assert_eq!(hits[0].lexical_score, Some(1.0));
        assert_eq!(hits[0].vector_distance, None);
    }

    #[tokio::test]
    async fn test_vector_search_reports_distances() {
        let store = store();
        let hits = store
            .lexical_and_vector_search("unrelated", Some(&[0.0, 1.0]), &[], 10)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.id, "pcp-22-1");
        assert_eq!(hits[0].vector_distance, Some(0.0));
        assert_eq!(hits[1].vector_distance, Some(1.0));
    }

    #[tokio::test]
    async fn test_fetch_by_predicate() {
        let store = store();
        let chunks = store
            .fetch_by_predicate(&Predicate::DocumentIds(vec!["PCP.0022".to_string()]), 10)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "pcp-22-1");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = store();
        store.fail_partition(DocumentType::Principle);
        assert!(store
            .lexical_and_vector_search("standards", None, &[DocumentType::Principle], 5)
            .await
            .is_err());
        assert!(store
            .lexical_and_vector_search("event", None, &[DocumentType::DecisionRecord], 5)
            .await
            .is_ok());

        store.set_unavailable(true);
        assert!(store
            .fetch_by_predicate(&Predicate::DocumentTypes(vec![DocumentType::Policy]), 5)
            .await
            .is_err());
    }

    #[test]
    fn test_insert_replaces_existing_id() {
        let store = store();
        store.insert(vec![Chunk::new("dar-1", DocumentType::ApprovalRecord, "updated")]);
        assert_eq!(store.len(), 3);
    }
}
