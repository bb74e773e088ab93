use std::cmp::Ordering;

use crate::storage::{DistanceMetric, StoreHit};
use crate::types::{Chunk, RetrievalResult};

/// Weighted combination of normalized component scores.
/// `alpha = 1.0` is pure vector, `alpha = 0.0` pure lexical.
pub fn blend(alpha: f32, vector_score: f32, lexical_score: f32) -> f32 {
    let alpha = alpha.clamp(0.0, 1.0);
    alpha * vector_score + (1.0 - alpha) * lexical_score
}

/// Map raw lexical scores to [0, 1]. Missing scores become 0. Scores already
/// in range are kept as-is; when any exceeds 1 (BM25-style) the set is
/// divided by its maximum.
pub fn normalize_lexical(scores: &[Option<f32>]) -> Vec<f32> {
    let raw: Vec<f32> = scores
        .iter()
        .map(|s| s.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0))
        .collect();
    let max = raw.iter().copied().fold(0.0f32, f32::max);
    if max > 1.0 {
        raw.iter().map(|s| s / max).collect()
    } else {
        raw
    }
}

/// Score store hits. Order is preserved; ranks are assigned by `rank_results`.
pub fn weighted_fusion(hits: Vec<StoreHit>, metric: DistanceMetric, alpha: f32) -> Vec<RetrievalResult> {
    let lexical: Vec<Option<f32>> = hits.iter().map(|h| h.lexical_score).collect();
    let lexical = normalize_lexical(&lexical);

    hits.into_iter()
        .zip(lexical)
        .map(|(hit, lexical_score)| {
            let vector_score = hit
                .vector_distance
                .map(|d| metric.to_similarity(d))
                .unwrap_or(0.0);
            RetrievalResult {
                blended_score: blend(alpha, vector_score, lexical_score),
                chunk: hit.chunk,
                lexical_score,
                vector_score,
                rank: 0,
            }
        })
        .collect()
}

/// Results for chunks fetched by an exact predicate: every component is 1.0.
pub fn exact_matches(chunks: Vec<Chunk>) -> Vec<RetrievalResult> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| RetrievalResult {
            chunk,
            lexical_score: 1.0,
            vector_score: 1.0,
            blended_score: 1.0,
            rank: i + 1,
        })
        .collect()
}

/// Move exact matches whose section the query names ("consequences of
/// ADR.12") ahead of the others, keeping their relative order. `query` is
/// expected in lowercase.
pub fn favor_named_sections(mut results: Vec<RetrievalResult>, query: &str) -> Vec<RetrievalResult> {
    results.sort_by_key(|r| {
        let section = r.chunk.section_label.to_lowercase();
        section.is_empty() || !query.contains(section.as_str())
    });
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    results
}

/// Sort by blended score descending, ties by ascending chunk id, then
/// truncate and assign 1-based ranks.
pub fn rank_results(mut results: Vec<RetrievalResult>, limit: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.blended_score
            .partial_cmp(&a.blended_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(limit);
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;

    fn hit(id: &str, lexical: Option<f32>, distance: Option<f32>) -> StoreHit {
        StoreHit {
            chunk: Chunk::new(id, DocumentType::Principle, "text"),
            lexical_score: lexical,
            vector_distance: distance,
        }
    }

    #[test]
    fn test_blend_weights() {
        assert_eq!(blend(1.0, 0.8, 0.2), 0.8);
        assert_eq!(blend(0.0, 0.8, 0.2), 0.2);
        assert!((blend(0.7, 1.0, 0.0) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_lexical_normalization() {
        assert_eq!(normalize_lexical(&[Some(0.5), None]), vec![0.5, 0.0]);
        assert_eq!(normalize_lexical(&[Some(4.0), Some(2.0), None]), vec![1.0, 0.5, 0.0]);
        assert_eq!(normalize_lexical(&[Some(f32::NAN)]), vec![0.0]);
    }

    #[test]
    fn test_missing_components_count_as_zero() {
        let results = weighted_fusion(
            vec![hit("a", None, Some(0.0)), hit("b", Some(1.0), None)],
            DistanceMetric::Cosine,
            0.5,
        );
        assert_eq!(results[0].vector_score, 1.0);
        assert_eq!(results[0].lexical_score, 0.0);
        assert_eq!(results[0].blended_score, 0.5);
        assert_eq!(results[1].blended_score, 0.5);
    }

    #[test]
    fn test_cosine_distance_is_halved() {
        let results = weighted_fusion(vec![hit("a", None, Some(1.0))], DistanceMetric::Cosine, 1.0);
        assert_eq!(results[0].vector_score, 0.5);
        let results = weighted_fusion(vec![hit("a", None, Some(0.2))], DistanceMetric::UnitDistance, 1.0);
        assert!((results[0].vector_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_ranking_breaks_ties_by_chunk_id() {
        let results = weighted_fusion(
            vec![
                hit("c", Some(0.5), None),
                hit("a", Some(0.5), None),
                hit("b", Some(0.9), None),
            ],
            DistanceMetric::Cosine,
            0.0,
        );
        let ranked = rank_results(results, 2);
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_named_section_moves_first() {
        let chunks = vec![
            Chunk::new("a-1", DocumentType::DecisionRecord, "We adopt it.").with_section("Decision"),
            Chunk::new("a-2", DocumentType::DecisionRecord, "It costs more.").with_section("Consequences"),
            Chunk::new("a-3", DocumentType::DecisionRecord, "Untitled part."),
        ];
        let ranked = favor_named_sections(exact_matches(chunks.clone()), "what are the consequences of adr.1?");
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a-1", "a-3"]);
        assert_eq!(ranked[0].rank, 1);

        let ranked = favor_named_sections(exact_matches(chunks), "adr.1");
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "a-2", "a-3"]);
    }
}
