use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ContextTracker, ConversationState};
use crate::embeddings::{query_text, EmbeddingModel};
use crate::error::{ConfigError, EngineError};
use crate::rag::analyzer::{QueryAnalysis, QueryAnalyzer};
use crate::rag::retrieval_decision::{AbstentionReason, ConfidenceGate, GateDecision, GateInput};
use crate::rag::synthesis::{counting_answer, listing_answer, synthesize_or_fallback, AnswerSynthesizer};
use crate::search::filter::{dedup_by_document, distinct_documents, ExclusionPolicy};
use crate::search::hybrid::{exact_matches, favor_named_sections, rank_results};
use crate::search::retriever::{HybridRetriever, PartitionReport, SearchRequest};
use crate::storage::{ChunkStore, Predicate};
use crate::trace::{QueryTrace, RetrievalPath, TraceRecorder};
use crate::types::{Chunk, DocumentType, Intent, ResultProjection, RetrievalResult};

/// One question from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    /// Turns sharing an id share follow-up context.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Overrides the per-intent alpha preset.
    #[serde(default)]
    pub alpha: Option<f32>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// The caller is browsing approval records (DAR path); lifts their exclusion.
    #[serde(default)]
    pub approval_path: bool,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn on_approval_path(mut self) -> Self {
        self.approval_path = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub intent: Intent,
    /// 0.0 when the engine abstained.
    pub confidence: f32,
    /// The engine declined to answer; `suggested_refinements` says how to retry.
    pub no_good_results: bool,
    pub chunks: Vec<ResultProjection>,
    pub terminology_matches: Vec<ResultProjection>,
    pub suggested_refinements: Vec<String>,
    pub answer: Option<String>,
    /// Number of distinct documents, for counting questions.
    pub count: Option<usize>,
    /// Canonical ids the query resolved to.
    pub references: Vec<String>,
    pub clarification_candidates: Vec<String>,
    pub latency_ms: u64,
    pub trace: QueryTrace,
}

/// What a retrieval path hands to the gate and the assembler.
#[derive(Default)]
struct Evidence {
    results: Vec<RetrievalResult>,
    terminology: Vec<RetrievalResult>,
    total_failure: bool,
    requested_ids: Vec<String>,
    canonical_match: bool,
    count: Option<usize>,
}

pub struct QueryEngine {
    config: Arc<EngineConfig>,
    analyzer: QueryAnalyzer,
    retriever: HybridRetriever,
    gate: ConfidenceGate,
    tracker: ContextTracker,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
}

impl QueryEngine {
    /// Build an engine over a store. Without an embedder every search is
    /// lexical-only; without a synthesizer answers use the templated summary.
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn ChunkStore>,
        embedder: Option<Arc<dyn EmbeddingModel>>,
        synthesizer: Option<Arc<dyn AnswerSynthesizer>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let analyzer = QueryAnalyzer::new(&config)?;
        let gate = ConfidenceGate::new(&config)?;
        let tracker = ContextTracker::new(&config.context);
        let retriever = HybridRetriever::new(store, Arc::clone(&config));

        tracing::info!(
            families = analyzer.resolver().families().len(),
            embeddings = embedder.is_some(),
            synthesizer = synthesizer.is_some(),
            threshold = gate.threshold(),
            "Query engine initialized"
        );

        Ok(Self {
            config,
            analyzer,
            retriever,
            gate,
            tracker,
            embedder,
            synthesizer,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationState> {
        self.tracker.get(conversation_id)
    }

    pub fn forget_conversation(&self, conversation_id: &str) {
        self.tracker.clear(conversation_id);
    }

    /// Answer one question. Never fails: store and embedding problems are
    /// recovered, recorded on the trace, and end in an abstention at worst.
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        let query_id = Uuid::new_v4().to_string();
        let mut trace = TraceRecorder::new(query_id.clone(), request.text.clone());

        let state = request
            .conversation_id
            .as_deref()
            .and_then(|id| self.tracker.get(id));
        let analysis = self.analyzer.analyze(&request.text, state.as_ref());
        self.record_analysis(&mut trace, &analysis);

        let exclusions = ExclusionPolicy::for_query(analysis.approval_requested || request.approval_path);

        let (decision, evidence) = match analysis.intent {
            Intent::Conversational => {
                trace.record_path(RetrievalPath::NoRetrieval, None);
                (GateDecision::Accept { confidence: 1.0 }, Evidence::default())
            }
            Intent::OffTopic => {
                trace.record_path(RetrievalPath::NoRetrieval, None);
                (self.gate.abstain(AbstentionReason::OffTopic), Evidence::default())
            }
            Intent::ClarificationNeeded => {
                trace.record_path(RetrievalPath::NoRetrieval, None);
                let candidates = analysis.clarification_candidates();
                let reason = if candidates.is_empty() {
                    AbstentionReason::UnresolvedFollowUp
                } else {
                    AbstentionReason::AmbiguousReference { candidates }
                };
                (self.gate.abstain(reason), Evidence::default())
            }
            Intent::ExactLookup => {
                let evidence = self.exact_lookup(&analysis, &exclusions, &mut trace).await;
                (self.evaluate(analysis.intent, &evidence), evidence)
            }
            Intent::Listing | Intent::Counting => {
                let evidence = self.enumerate(&analysis, &request, &exclusions, &mut trace).await;
                (self.evaluate(analysis.intent, &evidence), evidence)
            }
            Intent::SemanticAnswer | Intent::TerminologyLookup => {
                let evidence = self.hybrid_search(&analysis, &request, &exclusions, &mut trace).await;
                (self.evaluate(analysis.intent, &evidence), evidence)
            }
        };

        let answer = self.assemble_answer(&analysis, &decision, &evidence).await;

        if !decision.is_abstain() && analysis.intent.needs_retrieval() {
            if let Some(conversation_id) = request.conversation_id.as_deref() {
                self.tracker
                    .record(conversation_id, analysis.extraction.resolved_ids(), analysis.subject);
            }
        }

        self.respond(query_id, analysis, decision, evidence, answer, trace)
    }

    fn record_analysis(&self, trace: &mut TraceRecorder, analysis: &QueryAnalysis) {
        let normalized = &analysis.normalized;
        trace.record_normalization(&normalized.text, &normalized.search_text, normalized.language);

        if let Some(rewrite) = &analysis.rewrite {
            trace.record_follow_up(rewrite.used_context, rewrite.explanation.clone());
        }

        trace.record_references(&analysis.extraction.references, &analysis.extraction.ranges);
        if !analysis.disambiguated.is_empty() {
            trace.event(
                "context_disambiguation",
                format!("settled {}", analysis.disambiguated.join(", ")),
            );
        }
        for reference in analysis.extraction.ambiguous() {
            trace.record_error(EngineError::ClassificationAmbiguous {
                raw: reference.raw_text.clone(),
                candidates: reference.candidates.clone(),
            });
        }

        let classification = &analysis.classification;
        trace.record_classification(
            classification.intent,
            Some(classification.rule.clone()),
            classification.scores.clone(),
            analysis.signals.clone(),
        );
        if analysis.override_applied {
            trace.record_override(classification.intent, analysis.intent);
        }
    }

    fn evaluate(&self, intent: Intent, evidence: &Evidence) -> GateDecision {
        self.gate.evaluate(&GateInput {
            intent,
            results: &evidence.results,
            total_failure: evidence.total_failure,
            requested_ids: &evidence.requested_ids,
            canonical_match: evidence.canonical_match,
        })
    }

    /// Fetch documents named by id. Ranges go to the store as one range
    /// predicate per family and yield one chunk per document; single ids
    /// skip the type exclusions and keep every chunk.
    async fn exact_lookup(
        &self,
        analysis: &QueryAnalysis,
        exclusions: &ExclusionPolicy,
        trace: &mut TraceRecorder,
    ) -> Evidence {
        let (predicates, requested_ids) = reference_predicates(analysis);
        let exclusions = if analysis.extraction.ranges.is_empty() {
            ExclusionPolicy::none()
        } else {
            exclusions.clone()
        };

        trace.record_path(RetrievalPath::ExactLookup, None);
        trace.record_filters(describe(&predicates), exclusions.is_active(), exclusions.excluded());

        let limit = self.config.retrieval.lookup_limit;
        let outcome = self.retriever.fetch(&predicates, limit, &exclusions).await;
        let matches = exact_matches(outcome.chunks);
        // A named document keeps all of its sections; a range lists documents.
        let results = if analysis.extraction.ranges.is_empty() {
            favor_named_sections(rank_results(matches, limit), &analysis.normalized.lower)
        } else {
            rank_results(dedup_by_document(matches), limit)
        };
        trace.record_candidates(&results);

        Evidence {
            results,
            total_failure: record_report(trace, outcome.report),
            requested_ids,
            canonical_match: true,
            ..Default::default()
        }
    }

    /// List or count documents. Every partition is a predicate fetch; the
    /// gate judges the run on whether it executed, not on scores.
    async fn enumerate(
        &self,
        analysis: &QueryAnalysis,
        request: &QueryRequest,
        exclusions: &ExclusionPolicy,
        trace: &mut TraceRecorder,
    ) -> Evidence {
        let predicates = if analysis.extraction.has_resolved() {
            reference_predicates(analysis).0
        } else {
            let types = match analysis.subject {
                Some(subject) => vec![subject],
                None => default_types(exclusions),
            };
            exclusions
                .allowed_types(&types)
                .into_iter()
                .map(|t| Predicate::DocumentTypes(vec![t]))
                .collect()
        };

        trace.record_path(RetrievalPath::Enumeration, None);
        trace.record_filters(describe(&predicates), exclusions.is_active(), exclusions.excluded());

        let limit = request
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.retrieval.enumeration_limit);
        let outcome = self
            .retriever
            .fetch(&predicates, self.config.retrieval.enumeration_limit, exclusions)
            .await;
        let count = distinct_documents(&outcome.chunks);
        let results = rank_results(dedup_by_document(exact_matches(outcome.chunks)), limit);
        trace.record_candidates(&results);

        Evidence {
            results,
            total_failure: record_report(trace, outcome.report),
            canonical_match: true,
            count: Some(count),
            ..Default::default()
        }
    }

    /// Blended lexical and vector search. Semantic answers also pull
    /// matching terminology entries in parallel when enrichment is on.
    async fn hybrid_search(
        &self,
        analysis: &QueryAnalysis,
        request: &QueryRequest,
        exclusions: &ExclusionPolicy,
        trace: &mut TraceRecorder,
    ) -> Evidence {
        let retrieval = &self.config.retrieval;
        let search_text = analysis.normalized.search_text.clone();

        let vector = self.embed(&search_text, trace).await;
        let alpha = if vector.is_some() {
            request
                .alpha
                .map(|a| a.clamp(0.0, 1.0))
                .unwrap_or_else(|| retrieval.alpha.for_intent(analysis.intent))
        } else {
            0.0
        };

        let terminology = analysis.intent == Intent::TerminologyLookup;
        let document_types = if terminology {
            vec![DocumentType::Terminology]
        } else {
            let scoped = analysis
                .subject
                .map(|s| exclusions.allowed_types(&[s]))
                .unwrap_or_default();
            if scoped.is_empty() {
                default_types(exclusions)
            } else {
                scoped
            }
        };

        let limit = request.limit.filter(|l| *l > 0).unwrap_or_else(|| {
            if terminology {
                retrieval.terminology_limit
            } else {
                analysis
                    .subject
                    .map(|s| retrieval.limit_for(s))
                    .unwrap_or(retrieval.default_limit)
            }
        });

        trace.record_path(RetrievalPath::HybridSearch, Some(alpha));
        trace.record_filters(
            Some(Predicate::DocumentTypes(document_types.clone()).describe()),
            exclusions.is_active(),
            exclusions.excluded(),
        );

        let main = SearchRequest {
            text: search_text.clone(),
            vector: vector.clone(),
            document_types,
            alpha,
            limit,
        };

        let enrich = !terminology
            && self.config.features.terminology_enrichment
            && exclusions.allows(DocumentType::Terminology);
        let (outcome, enrichment) = if enrich {
            let glossary = SearchRequest {
                text: search_text,
                vector,
                document_types: vec![DocumentType::Terminology],
                alpha,
                limit: retrieval.terminology_limit,
            };
            let (main, glossary) = tokio::join!(
                self.retriever.search(&main, exclusions),
                self.retriever.search(&glossary, exclusions)
            );
            (main, Some(glossary))
        } else {
            (self.retriever.search(&main, exclusions).await, None)
        };

        trace.record_candidates(&outcome.results);
        let total_failure = record_report(trace, outcome.report);

        // Enrichment never decides the answer; its failures are only traced.
        let terminology_results = match enrichment {
            Some(glossary) => {
                for error in glossary.report.errors {
                    trace.record_error(error);
                }
                glossary
                    .results
                    .into_iter()
                    .filter(|r| r.blended_score >= self.gate.threshold())
                    .collect()
            }
            None => Vec::new(),
        };

        Evidence {
            results: outcome.results,
            terminology: terminology_results,
            total_failure,
            ..Default::default()
        }
    }

    /// Query vector, or `None` when no model is configured or it failed.
    async fn embed(&self, text: &str, trace: &mut TraceRecorder) -> Option<Vec<f32>> {
        let Some(embedder) = self.embedder.as_ref().map(Arc::clone) else {
            trace.record_embedding(false);
            return None;
        };

        let input = query_text(text).to_string();
        let embedded = tokio::task::spawn_blocking(move || embedder.embed_query(&input)).await;
        let error = match embedded {
            Ok(Ok(vector)) => {
                trace.record_embedding(true);
                return Some(vector);
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        tracing::warn!(error = error.as_str(), "Query embedding failed, continuing lexical-only");
        trace.record_error(EngineError::EmbeddingUnavailable(error));
        trace.record_embedding(false);
        None
    }

    async fn assemble_answer(
        &self,
        analysis: &QueryAnalysis,
        decision: &GateDecision,
        evidence: &Evidence,
    ) -> Option<String> {
        if decision.is_abstain() {
            return None;
        }

        match analysis.intent {
            Intent::Conversational => Some(self.conversational_reply()),
            Intent::Counting => Some(counting_answer(analysis.subject, evidence.count.unwrap_or(0))),
            Intent::Listing => {
                let documents: Vec<Chunk> = evidence.results.iter().map(|r| r.chunk.clone()).collect();
                Some(listing_answer(analysis.subject, &documents))
            }
            Intent::ExactLookup | Intent::SemanticAnswer | Intent::TerminologyLookup => {
                let evidence: Vec<Chunk> = evidence.results.iter().map(|r| r.chunk.clone()).collect();
                let synthesizer = self
                    .synthesizer
                    .as_deref()
                    .filter(|_| self.config.features.synthesize_answers);
                let (answer, _) =
                    synthesize_or_fallback(synthesizer, &analysis.normalized.text, &evidence).await;
                Some(answer)
            }
            Intent::OffTopic | Intent::ClarificationNeeded => None,
        }
    }

    fn conversational_reply(&self) -> String {
        let labels: Vec<&str> = self
            .analyzer
            .resolver()
            .families()
            .iter()
            .map(|f| f.document_type.plural_label())
            .collect();
        match labels.as_slice() {
            [] => "Hello! Ask me a question about the document corpus.".to_string(),
            [one] => format!("Hello! Ask me a question about the {}.", one),
            [rest @ .., last] => format!(
                "Hello! Ask me a question about the {} or {}.",
                rest.join(", "),
                last
            ),
        }
    }

    fn respond(
        &self,
        query_id: String,
        analysis: QueryAnalysis,
        decision: GateDecision,
        evidence: Evidence,
        answer: Option<String>,
        trace: TraceRecorder,
    ) -> QueryResponse {
        let (confidence, reason, suggestions) = match decision {
            GateDecision::Accept { confidence } => (confidence, None, Vec::new()),
            GateDecision::Abstain { reason, suggestions } => (0.0, Some(reason), suggestions),
        };
        let abstained = reason.is_some();
        let trace = trace.finish(abstained, reason.as_ref().map(AbstentionReason::message));

        let (chunks, terminology_matches) = if abstained {
            (Vec::new(), Vec::new())
        } else {
            (
                evidence.results.iter().map(ResultProjection::from).collect(),
                evidence.terminology.iter().map(ResultProjection::from).collect(),
            )
        };
        let count = if analysis.intent == Intent::Counting && !abstained {
            evidence.count
        } else {
            None
        };

        tracing::info!(
            query_id = query_id.as_str(),
            intent = %analysis.intent,
            path = ?trace.path,
            results = chunks.len(),
            abstained,
            confidence,
            latency_ms = trace.latency_ms,
            "Query answered"
        );

        QueryResponse {
            query_id,
            intent: analysis.intent,
            confidence,
            no_good_results: abstained,
            chunks,
            terminology_matches,
            suggested_refinements: suggestions,
            answer,
            count,
            references: analysis.extraction.resolved_ids(),
            clarification_candidates: analysis.clarification_candidates(),
            latency_ms: trace.latency_ms,
            trace,
        }
    }
}

/// Types searched when the query names none.
fn default_types(exclusions: &ExclusionPolicy) -> Vec<DocumentType> {
    let mut types = DocumentType::ANSWERABLE.to_vec();
    if exclusions.allows(DocumentType::ApprovalRecord) {
        types.push(DocumentType::ApprovalRecord);
    }
    types
}

/// One range predicate per family with a range, and one id predicate for
/// the remaining resolved ids. Returns the ids that must each be found.
fn reference_predicates(analysis: &QueryAnalysis) -> (Vec<Predicate>, Vec<String>) {
    let extraction = &analysis.extraction;
    let mut predicates: Vec<Predicate> = extraction
        .ranges
        .iter()
        .map(|r| Predicate::NumberRange {
            prefix: r.prefix.clone(),
            start: r.start,
            end: r.end,
        })
        .collect();

    let single: Vec<String> = extraction
        .resolved()
        .filter(|r| extraction.range_for(&r.prefix).is_none())
        .filter_map(|r| r.canonical_id.clone())
        .collect();
    if !single.is_empty() {
        predicates.push(Predicate::DocumentIds(single.clone()));
    }
    (predicates, single)
}

fn describe(predicates: &[Predicate]) -> Option<String> {
    if predicates.is_empty() {
        return None;
    }
    Some(
        predicates
            .iter()
            .map(Predicate::describe)
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Move partition errors onto the trace; true when nothing could be reached.
fn record_report(trace: &mut TraceRecorder, report: PartitionReport) -> bool {
    let total_failure = report.total_failure();
    for error in report.into_errors() {
        trace.record_error(error);
    }
    total_failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::new("adr-12-1", DocumentType::DecisionRecord, "We adopt an event bus for integration between platforms.")
                .with_document("ADR.0012", "Event bus"),
            Chunk::new("adr-12-2", DocumentType::DecisionRecord, "Consequences: every platform publishes events.")
                .with_document("ADR.0012", "Event bus"),
            Chunk::new("adr-22", DocumentType::DecisionRecord, "Cloud hosting is preferred for new platforms.")
                .with_document("ADR.0022", "Cloud first"),
            Chunk::new("pcp-22", DocumentType::Principle, "Data is managed as a shared asset.")
                .with_document("PCP.0022", "Data as an asset"),
            Chunk::new("pcp-15", DocumentType::Principle, "Interoperability through open standards.")
                .with_document("PCP.0015", "Open standards"),
            Chunk::new("dar-3", DocumentType::ApprovalRecord, "Approval of ADR.0012 by the architecture board.")
                .with_document("DAR.0003", "Approval event bus"),
            Chunk::new("term-bus", DocumentType::Terminology, "Event bus: middleware that routes events between platforms."),
        ]
    }

    fn engine() -> QueryEngine {
        engine_with(InMemoryStore::with_chunks(corpus()))
    }

    fn engine_with(store: InMemoryStore) -> QueryEngine {
        QueryEngine::new(Arc::new(EngineConfig::default()), Arc::new(store), None, None).unwrap()
    }

    #[tokio::test]
    async fn test_exact_lookup_skips_exclusions() {
        let response = engine().query(QueryRequest::new("ADR.0012")).await;
        assert_eq!(response.intent, Intent::ExactLookup);
        assert_eq!(response.confidence, 1.0);
        assert!(!response.no_good_results);
        assert_eq!(response.references, vec!["ADR.0012"]);
        let ids: Vec<&str> = response.chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["adr-12-1", "adr-12-2"]);
        assert!(response
            .chunks
            .iter()
            .all(|c| c.document_id.as_deref() == Some("ADR.0012")));
        assert!(!response.trace.exclusions_applied);
        assert_eq!(response.trace.path, RetrievalPath::ExactLookup);
        assert!(response.answer.unwrap().starts_with("Based on the available information:"));
    }

    #[tokio::test]
    async fn test_missing_document_abstains() {
        let response = engine().query(QueryRequest::new("ADR.0077")).await;
        assert!(response.no_good_results);
        assert_eq!(response.confidence, 0.0);
        assert!(response.chunks.is_empty());
        assert!(response.answer.is_none());
        assert_eq!(
            response.trace.abstention_reason.as_deref(),
            Some("no relevant documents found")
        );

        // One of two requested documents exists: the gate names the other.
        let response = engine().query(QueryRequest::new("ADR.12 and PCP.77")).await;
        assert!(response.no_good_results);
        assert_eq!(response.references, vec!["ADR.0012", "PCP.0077"]);
        assert_eq!(response.suggested_refinements[0], "Verify the identifier PCP.0077");
    }

    #[tokio::test]
    async fn test_listing_applies_exclusions() {
        let response = engine().query(QueryRequest::new("List all ADRs")).await;
        assert_eq!(response.intent, Intent::Listing);
        assert_eq!(response.confidence, 1.0);
        assert!(response.trace.exclusions_applied);
        let ids: Vec<_> = response.chunks.iter().filter_map(|c| c.document_id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"ADR.0012".to_string()));
        assert!(response.answer.unwrap().starts_with("Found 2 decision records:"));
    }

    #[tokio::test]
    async fn test_counting_counts_documents_not_chunks() {
        let response = engine().query(QueryRequest::new("How many ADRs are there?")).await;
        assert_eq!(response.intent, Intent::Counting);
        assert_eq!(response.count, Some(2));
        assert_eq!(response.answer.as_deref(), Some("Number of decision records: 2."));
    }

    #[tokio::test]
    async fn test_store_outage_is_not_a_confident_zero() {
        let store = InMemoryStore::with_chunks(corpus());
        store.set_unavailable(true);
        let response = engine_with(store).query(QueryRequest::new("How many ADRs are there?")).await;
        assert!(response.no_good_results);
        assert_eq!(response.count, None);
        assert!(response
            .trace
            .recovered_errors
            .contains(&EngineError::RetrievalTotalFailure { attempted: 1 }));
        assert_eq!(
            response.trace.abstention_reason.as_deref(),
            Some(AbstentionReason::StoreUnavailable.message().as_str())
        );
    }

    #[tokio::test]
    async fn test_ambiguous_number_asks_for_clarification() {
        let response = engine().query(QueryRequest::new("What does 22 decide?")).await;
        assert_eq!(response.intent, Intent::ClarificationNeeded);
        assert!(response.no_good_results);
        assert_eq!(response.clarification_candidates, vec!["ADR.0022", "PCP.0022"]);
        assert_eq!(response.suggested_refinements[0], "Did you mean ADR.0022?");
        assert!(matches!(
            response.trace.recovered_errors[0],
            EngineError::ClassificationAmbiguous { .. }
        ));
    }

    #[tokio::test]
    async fn test_follow_up_uses_conversation_state() {
        let engine = engine();
        let first = engine
            .query(QueryRequest::new("List all principles").in_conversation("c1"))
            .await;
        assert!(!first.no_good_results);
        assert_eq!(
            engine.conversation("c1").and_then(|s| s.last_subject),
            Some(DocumentType::Principle)
        );

        let follow_up = engine.query(QueryRequest::new("list them").in_conversation("c1")).await;
        assert_eq!(follow_up.intent, Intent::Listing);
        assert!(follow_up.trace.follow_up_bound);
        assert!(follow_up.chunks.iter().all(|c| c.document_type == DocumentType::Principle));

        let unbound = engine.query(QueryRequest::new("list them").in_conversation("c2")).await;
        assert_eq!(unbound.intent, Intent::ClarificationNeeded);
        assert!(unbound.no_good_results);
    }

    #[tokio::test]
    async fn test_abstention_leaves_context_untouched() {
        let engine = engine();
        engine.query(QueryRequest::new("ADR.0012").in_conversation("c1")).await;
        engine.query(QueryRequest::new("ADR.0077").in_conversation("c1")).await;
        let state = engine.conversation("c1").unwrap();
        assert_eq!(state.last_doc_refs, vec!["ADR.0012"]);
    }

    #[tokio::test]
    async fn test_conversational_and_off_topic() {
        let engine = engine();
        let hello = engine.query(QueryRequest::new("hello")).await;
        assert_eq!(hello.intent, Intent::Conversational);
        assert!(!hello.no_good_results);
        assert!(hello.answer.unwrap().starts_with("Hello!"));
        assert_eq!(hello.trace.path, RetrievalPath::NoRetrieval);

        let weather = engine.query(QueryRequest::new("will it rain in Amsterdam tomorrow")).await;
        assert_eq!(weather.intent, Intent::OffTopic);
        assert!(weather.no_good_results);
        assert!(weather.suggested_refinements.contains(&"Ask about principles (PCP)".to_string()));
    }

    struct BrokenEmbedder;

    impl EmbeddingModel for BrokenEmbedder {
        fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("model not loaded")
        }

        fn embed_document(&self, _text: &str) -> Result<Vec<f32>> {
            anyhow::bail!("model not loaded")
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_lexical() {
        let engine = QueryEngine::new(
            Arc::new(EngineConfig::default()),
            Arc::new(InMemoryStore::with_chunks(corpus())),
            Some(Arc::new(BrokenEmbedder)),
            None,
        )
        .unwrap();

        let response = engine
            .query(QueryRequest::new("why do we adopt an event bus for integration"))
            .await;
        assert_eq!(response.intent, Intent::SemanticAnswer);
        assert!(!response.trace.embedding_available);
        assert_eq!(response.trace.alpha, Some(0.0));
        assert!(matches!(
            response.trace.recovered_errors[0],
            EngineError::EmbeddingUnavailable(_)
        ));
    }

    struct StaticSynthesizer;

    #[async_trait]
    impl AnswerSynthesizer for StaticSynthesizer {
        async fn synthesize(&self, _query: &str, evidence: &[Chunk]) -> Result<String> {
            Ok(format!("synthesized from {} chunks", evidence.len()))
        }
    }

    #[tokio::test]
    async fn test_synthesizer_is_used_when_enabled() {
        let store: Arc<dyn ChunkStore> = Arc::new(InMemoryStore::with_chunks(corpus()));
        let engine = QueryEngine::new(
            Arc::new(EngineConfig::default()),
            Arc::clone(&store),
            None,
            Some(Arc::new(StaticSynthesizer)),
        )
        .unwrap();
        let response = engine.query(QueryRequest::new("ADR.0012")).await;
        assert_eq!(response.answer.as_deref(), Some("synthesized from 2 chunks"));

        let mut config = EngineConfig::default();
        config.features.synthesize_answers = false;
        let engine = QueryEngine::new(Arc::new(config), store, None, Some(Arc::new(StaticSynthesizer))).unwrap();
        let response = engine.query(QueryRequest::new("ADR.0012")).await;
        assert!(response.answer.unwrap().starts_with("Based on the available information:"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.gate.min_score_threshold = 1.5;
        let result = QueryEngine::new(
            Arc::new(config),
            Arc::new(InMemoryStore::new()),
            None,
            None,
        );
        assert!(matches!(result, Err(ConfigError::OutOfUnitRange { .. })));
    }
}
