//! Document-type exclusion and per-document deduplication.
//!
//! Exclusions run here, after the store has evaluated its own predicate.
//! Range predicates and type exclusions are never sent to the store as one
//! compound filter.

use std::collections::HashSet;

use crate::types::{Chunk, DocumentType, RetrievalResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionPolicy {
    excluded: Vec<DocumentType>,
}

impl ExclusionPolicy {
    /// The default set minus approval records when approvals were asked for.
    pub fn for_query(approval_requested: bool) -> Self {
        let excluded = DocumentType::DEFAULT_EXCLUDED
            .into_iter()
            .filter(|t| !(approval_requested && *t == DocumentType::ApprovalRecord))
            .collect();
        Self { excluded }
    }

    pub fn none() -> Self {
        Self { excluded: Vec::new() }
    }

    pub fn excluded(&self) -> &[DocumentType] {
        &self.excluded
    }

    pub fn is_active(&self) -> bool {
        !self.excluded.is_empty()
    }

    pub fn allows(&self, document_type: DocumentType) -> bool {
        !self.excluded.contains(&document_type)
    }

    /// Keep only allowed types from a candidate list.
    pub fn allowed_types(&self, types: &[DocumentType]) -> Vec<DocumentType> {
        types.iter().copied().filter(|t| self.allows(*t)).collect()
    }

    pub fn filter_chunks(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        chunks.into_iter().filter(|c| self.allows(c.document_type)).collect()
    }

    pub fn filter_results(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        results
            .into_iter()
            .filter(|r| self.allows(r.chunk.document_type))
            .collect()
    }
}

/// Keep the first chunk per chunk id, in input order.
pub fn dedup_chunks_by_id(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks.into_iter().filter(|c| seen.insert(c.id.clone())).collect()
}

/// Keep the first result per document (or per chunk when ungrouped), in input order.
pub fn dedup_by_document(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.chunk.grouping_key().to_string()))
        .collect()
}

/// Number of distinct documents among the chunks.
pub fn distinct_documents(chunks: &[Chunk]) -> usize {
    chunks
        .iter()
        .map(|c| c.grouping_key())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::hybrid::exact_matches;

    fn chunk(id: &str, doc: &str, doc_type: DocumentType) -> Chunk {
        Chunk::new(id, doc_type, "text").with_document(doc, "title")
    }

    #[test]
    fn test_default_exclusions() {
        let policy = ExclusionPolicy::for_query(false);
        assert!(policy.is_active());
        assert!(!policy.allows(DocumentType::ApprovalRecord));
        assert!(!policy.allows(DocumentType::Template));
        assert!(!policy.allows(DocumentType::Index));
        assert!(policy.allows(DocumentType::DecisionRecord));
    }

    #[test]
    fn test_approval_keyword_lifts_approval_exclusion_only() {
        let policy = ExclusionPolicy::for_query(true);
        assert!(policy.allows(DocumentType::ApprovalRecord));
        assert_eq!(policy.excluded(), &[DocumentType::Template, DocumentType::Index]);
    }

    #[test]
    fn test_filter_chunks() {
        let chunks = vec![
            chunk("1", "ADR.0012", DocumentType::DecisionRecord),
            chunk("2", "DAR.0003", DocumentType::ApprovalRecord),
            chunk("3", "TPL.0001", DocumentType::Template),
        ];
        let kept = ExclusionPolicy::for_query(false).filter_chunks(chunks.clone());
        assert_eq!(kept.len(), 1);
        assert_eq!(ExclusionPolicy::none().filter_chunks(chunks).len(), 3);
    }

    #[test]
    fn test_dedup_keeps_first_per_document() {
        let results = exact_matches(vec![
            chunk("b", "ADR.0012", DocumentType::DecisionRecord),
            chunk("a", "ADR.0012", DocumentType::DecisionRecord),
            Chunk::new("loose", DocumentType::Terminology, "text"),
        ]);
        let deduped = dedup_by_document(results);
        let ids: Vec<&str> = deduped.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "loose"]);
    }

    #[test]
    fn test_distinct_documents() {
        let chunks = vec![
            chunk("1", "PCP.0010", DocumentType::Principle),
            chunk("2", "PCP.0010", DocumentType::Principle),
            chunk("3", "PCP.0011", DocumentType::Principle),
        ];
        assert_eq!(distinct_documents(&chunks), 2);
        assert_eq!(dedup_chunks_by_id(chunks).len(), 3);
    }
}
