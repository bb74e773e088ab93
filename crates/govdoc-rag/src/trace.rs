//! Query trace.
//!
//! A `TraceRecorder` collects events while a query is processed. Nothing in
//! the pipeline reads from it; `finish` is called once the answer decision is
//! final and yields the immutable `QueryTrace` returned to the caller.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::EngineError;
use crate::types::{
    DocReference, DocumentType, ExtractedSignals, Intent, Language, ReferenceRange,
    RetrievalResult,
};

/// Retrieval path executed for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    ExactLookup,
    Enumeration,
    HybridSearch,
    NoRetrieval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleHit {
    /// Priority of the classification rule that fired. 0 is the unresolved
    /// follow-up check that runs before the ordinary rules.
    pub index: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: String,
    pub detail: String,
    pub elapsed_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceCandidate {
    pub rank: usize,
    pub chunk_id: String,
    pub document_id: Option<String>,
    pub lexical_score: f32,
    pub vector_score: f32,
    pub blended_score: f32,
}

impl From<&RetrievalResult> for TraceCandidate {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            rank: result.rank,
            chunk_id: result.chunk.id.clone(),
            document_id: result.chunk.document_id.clone(),
            lexical_score: result.lexical_score,
            vector_score: result.vector_score,
            blended_score: result.blended_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTrace {
    pub query_id: String,
    pub raw_query: String,
    pub normalized_query: String,
    pub search_text: String,
    pub language: Language,
    pub signals: ExtractedSignals,
    pub intent: Intent,
    pub rule: Option<RuleHit>,
    /// Integer score per candidate intent; the highest wins.
    pub intent_scores: Vec<(Intent, i32)>,
    pub references: Vec<DocReference>,
    pub ranges: Vec<ReferenceRange>,
    pub override_applied: bool,
    pub follow_up_bound: bool,
    pub path: RetrievalPath,
    pub alpha: Option<f32>,
    pub predicate: Option<String>,
    pub exclusions_applied: bool,
    pub excluded_types: Vec<DocumentType>,
    pub embedding_available: bool,
    pub recovered_errors: Vec<EngineError>,
    pub top_candidates: Vec<TraceCandidate>,
    pub abstained: bool,
    pub abstention_reason: Option<String>,
    pub latency_ms: u64,
    pub events: Vec<TraceEvent>,
}

/// Number of candidates copied into the trace.
const TRACE_CANDIDATES: usize = 10;

pub struct TraceRecorder {
    started: Instant,
    trace: QueryTrace,
}

impl TraceRecorder {
    pub fn new(query_id: impl Into<String>, raw_query: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            trace: QueryTrace {
                query_id: query_id.into(),
                raw_query: raw_query.into(),
                normalized_query: String::new(),
                search_text: String::new(),
                language: Language::Both,
                signals: ExtractedSignals::default(),
                intent: Intent::OffTopic,
                rule: None,
                intent_scores: Vec::new(),
                references: Vec::new(),
                ranges: Vec::new(),
                override_applied: false,
                follow_up_bound: false,
                path: RetrievalPath::NoRetrieval,
                alpha: None,
                predicate: None,
                exclusions_applied: false,
                excluded_types: Vec::new(),
                embedding_available: false,
                recovered_errors: Vec::new(),
                top_candidates: Vec::new(),
                abstained: false,
                abstention_reason: None,
                latency_ms: 0,
                events: Vec::new(),
            },
        }
    }

    pub fn event(&mut self, step: &str, detail: impl Into<String>) {
        let elapsed_us = self.started.elapsed().as_micros() as u64;
        self.trace.events.push(TraceEvent {
            step: step.to_string(),
            detail: detail.into(),
            elapsed_us,
        });
    }

    pub fn record_normalization(&mut self, normalized: &str, search_text: &str, language: Language) {
        self.trace.normalized_query = normalized.to_string();
        self.trace.search_text = search_text.to_string();
        self.trace.language = language;
        self.event("normalize", format!("language={:?}", language));
    }

    pub fn record_classification(
        &mut self,
        intent: Intent,
        rule: Option<RuleHit>,
        scores: Vec<(Intent, i32)>,
        signals: ExtractedSignals,
    ) {
        let detail = match &rule {
            Some(hit) => format!("{} via rule {} ({})", intent, hit.index, hit.name),
            None => intent.to_string(),
        };
        self.trace.intent = intent;
        self.trace.rule = rule;
        self.trace.intent_scores = scores;
        self.trace.signals = signals;
        self.event("classify", detail);
    }

    pub fn record_references(&mut self, references: &[DocReference], ranges: &[ReferenceRange]) {
        self.trace.references = references.to_vec();
        self.trace.ranges = ranges.to_vec();
        self.event(
            "resolve_references",
            format!("{} references, {} ranges", references.len(), ranges.len()),
        );
    }

    pub fn record_override(&mut self, from: Intent, to: Intent) {
        self.trace.override_applied = true;
        self.trace.intent = to;
        self.event("doc_reference_override", format!("{} -> {}", from, to));
    }

    pub fn record_follow_up(&mut self, bound: bool, detail: impl Into<String>) {
        self.trace.follow_up_bound = bound;
        self.event("follow_up", detail);
    }

    pub fn record_path(&mut self, path: RetrievalPath, alpha: Option<f32>) {
        self.trace.path = path;
        self.trace.alpha = alpha;
        self.event("route", format!("{:?}", path));
    }

    pub fn record_filters(
        &mut self,
        predicate: Option<String>,
        exclusions_applied: bool,
        excluded_types: &[DocumentType],
    ) {
        self.trace.predicate = predicate;
        self.trace.exclusions_applied = exclusions_applied;
        self.trace.excluded_types = excluded_types.to_vec();
    }

    pub fn record_embedding(&mut self, available: bool) {
        self.trace.embedding_available = available;
        self.event("embed", if available { "vector available" } else { "lexical only" });
    }

    pub fn record_error(&mut self, error: EngineError) {
        self.event("recovered_error", error.to_string());
        self.trace.recovered_errors.push(error);
    }

    pub fn record_candidates(&mut self, results: &[RetrievalResult]) {
        self.trace.top_candidates = results
            .iter()
            .take(TRACE_CANDIDATES)
            .map(TraceCandidate::from)
            .collect();
        self.event("retrieve", format!("{} results", results.len()));
    }

    /// Seal the trace once the answer decision is final.
    pub fn finish(mut self, abstained: bool, abstention_reason: Option<String>) -> QueryTrace {
        self.trace.abstained = abstained;
        self.trace.abstention_reason = abstention_reason;
        self.trace.latency_ms = self.started.elapsed().as_millis() as u64;
        self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, DocumentType};

    #[test]
    fn test_events_are_appended_in_order() {
        let mut recorder = TraceRecorder::new("q-1", "ADR.0012");
        recorder.record_normalization("ADR.0012", "ADR.0012", Language::Both);
        recorder.record_path(RetrievalPath::ExactLookup, None);
        let trace = recorder.finish(false, None);

        let steps: Vec<&str> = trace.events.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, vec!["normalize", "route"]);
        assert!(trace.events[0].elapsed_us <= trace.events[1].elapsed_us);
        assert_eq!(trace.path, RetrievalPath::ExactLookup);
    }

    #[test]
    fn test_candidates_are_capped() {
        let results: Vec<RetrievalResult> = (0..15)
            .map(|i| RetrievalResult {
                chunk: Chunk::new(format!("c-{i:02}"), DocumentType::Principle, "text"),
                lexical_score: 0.5,
                vector_score: 0.5,
                blended_score: 0.5,
                rank: i + 1,
            })
            .collect();
        let mut recorder = TraceRecorder::new("q-2", "principles");
        recorder.record_candidates(&results);
        let trace = recorder.finish(true, Some("low confidence".to_string()));
        assert_eq!(trace.top_candidates.len(), TRACE_CANDIDATES);
        assert!(trace.abstained);
    }

    #[test]
    fn test_override_rewrites_intent() {
        let mut recorder = TraceRecorder::new("q-3", "tell me about ADR 12");
        recorder.record_classification(Intent::SemanticAnswer, None, Vec::new(), ExtractedSignals::default());
        recorder.record_override(Intent::SemanticAnswer, Intent::ExactLookup);
        let trace = recorder.finish(false, None);
        assert!(trace.override_applied);
        assert_eq!(trace.intent, Intent::ExactLookup);
    }
}
