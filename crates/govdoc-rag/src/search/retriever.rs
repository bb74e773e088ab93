//! Partitioned retrieval against the chunk store.
//!
//! Every lookup is split into independent partitions (one per document type
//! or per predicate) that run concurrently. A partition that fails or times
//! out is logged and skipped; siblings are never cancelled. Only when every
//! partition fails is the outcome flagged as a total failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::search::filter::{dedup_by_document, dedup_chunks_by_id, ExclusionPolicy};
use crate::search::hybrid::{rank_results, weighted_fusion};
use crate::storage::{ChunkStore, Predicate, StoreHit};
use crate::types::{Chunk, DocumentType, RetrievalResult};

/// Parameters of one hybrid search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: String,
    pub vector: Option<Vec<f32>>,
    /// One partition per type.
    pub document_types: Vec<DocumentType>,
    pub alpha: f32,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionReport {
    pub attempted: usize,
    pub errors: Vec<EngineError>,
}

impl PartitionReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn total_failure(&self) -> bool {
        self.attempted > 0 && self.failed() == self.attempted
    }

    /// Partition errors plus a total-failure marker when nothing succeeded.
    pub fn into_errors(self) -> Vec<EngineError> {
        let total = self.total_failure();
        let attempted = self.attempted;
        let mut errors = self.errors;
        if total {
            errors.push(EngineError::RetrievalTotalFailure { attempted });
        }
        errors
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<RetrievalResult>,
    pub report: PartitionReport,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub chunks: Vec<Chunk>,
    pub report: PartitionReport,
}

pub struct HybridRetriever {
    store: Arc<dyn ChunkStore>,
    config: Arc<EngineConfig>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn ChunkStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.retrieval.partition_timeout_ms.map(Duration::from_millis)
    }

    /// Run partitions concurrently; each yields its items or an error.
    async fn run_partitions<T, Fut>(&self, partitions: Vec<(String, Fut)>) -> (Vec<T>, PartitionReport)
    where
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let timeout = self.timeout();
        let attempted = partitions.len();
        let (labels, futures): (Vec<String>, Vec<Fut>) = partitions.into_iter().unzip();

        let outcomes = join_all(futures.into_iter().map(|fut| async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {} ms", limit.as_millis())),
                },
                None => fut.await,
            }
        }))
        .await;

        let mut items = Vec::new();
        let mut report = PartitionReport {
            attempted,
            errors: Vec::new(),
        };
        for (label, outcome) in labels.into_iter().zip(outcomes) {
            match outcome {
                Ok(mut found) => items.append(&mut found),
                Err(e) => {
                    tracing::warn!(partition = label.as_str(), error = %e, "Retrieval partition failed");
                    report.errors.push(EngineError::RetrievalPartitionFailed {
                        partition: label,
                        message: e.to_string(),
                    });
                }
            }
        }

        if report.total_failure() {
            tracing::warn!(attempted, "All retrieval partitions failed");
        }
        (items, report)
    }

    /// Hybrid search across the requested document types. Results are
    /// excluded, deduplicated per document in store order, ranked and
    /// truncated to `limit`.
    pub async fn search(&self, request: &SearchRequest, exclusions: &ExclusionPolicy) -> SearchOutcome {
        let candidate_limit = request
            .limit
            .saturating_mul(self.config.retrieval.candidate_multiplier)
            .max(request.limit);
        let vector = request.vector.as_deref();

        let partitions: Vec<(String, _)> = request
            .document_types
            .iter()
            .map(|doc_type| {
                let store = Arc::clone(&self.store);
                let text = request.text.as_str();
                let types = [*doc_type];
                let fut = async move {
                    store
                        .lexical_and_vector_search(text, vector, &types, candidate_limit)
                        .await
                };
                (doc_type.as_str().to_string(), fut)
            })
            .collect();

        let (hits, report): (Vec<StoreHit>, PartitionReport) = self.run_partitions(partitions).await;
        let candidates = hits.len();

        let fused = weighted_fusion(hits, self.store.distance_metric(), request.alpha);
        let fused = exclusions.filter_results(fused);
        let deduped = dedup_by_document(fused);
        let results = rank_results(deduped, request.limit);

        tracing::info!(
            partitions = report.attempted,
            failed = report.failed(),
            candidates,
            returned = results.len(),
            alpha = request.alpha,
            top_score = results.first().map(|r| r.blended_score).unwrap_or(0.0),
            "Hybrid search complete"
        );

        SearchOutcome { results, report }
    }

    /// Fetch by predicates, one partition each. Chunks come back in store
    /// order, deduplicated by chunk id; exclusions are applied afterwards.
    pub async fn fetch(
        &self,
        predicates: &[Predicate],
        limit: usize,
        exclusions: &ExclusionPolicy,
    ) -> FetchOutcome {
        let partitions: Vec<(String, _)> = predicates
            .iter()
            .map(|predicate| {
                let store = Arc::clone(&self.store);
                let fut = async move { store.fetch_by_predicate(predicate, limit).await };
                (predicate.describe(), fut)
            })
            .collect();

        let (chunks, report) = self.run_partitions(partitions).await;
        let fetched = chunks.len();
        let chunks = exclusions.filter_chunks(dedup_chunks_by_id(chunks));

        tracing::info!(
            partitions = report.attempted,
            failed = report.failed(),
            fetched,
            kept = chunks.len(),
            "Predicate fetch complete"
        );

        FetchOutcome { chunks, report }
    }
}
