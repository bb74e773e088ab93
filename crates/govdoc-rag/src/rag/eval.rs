//! Offline evaluation harness.
//!
//! Runs a labelled question set through any answering function and scores
//! two things: whether the intent came out right, and how well the expected
//! documents were ranked. Document ids are compared canonically
//! ("ADR.0012"), so chunk-level duplicates do not inflate the numbers.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::Intent;

/// One labelled question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuery {
    pub query: String,
    /// Skip the intent check when `None`.
    #[serde(default)]
    pub expected_intent: Option<Intent>,
    /// Canonical ids of the documents that answer the question.
    #[serde(default)]
    pub relevant_documents: HashSet<String>,
    /// Whether the engine should decline to answer.
    #[serde(default)]
    pub expect_abstain: Option<bool>,
}

impl EvalQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            expected_intent: None,
            relevant_documents: HashSet::new(),
            expect_abstain: None,
        }
    }

    pub fn expecting(mut self, intent: Intent) -> Self {
        self.expected_intent = Some(intent);
        self
    }

    pub fn relevant<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant_documents.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn abstains(mut self, abstain: bool) -> Self {
        self.expect_abstain = Some(abstain);
        self
    }
}

/// What the engine produced for one question.
#[derive(Debug, Clone)]
pub struct EvalRun {
    pub intent: Intent,
    /// Document ids in rank order.
    pub documents: Vec<String>,
    pub abstained: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalMetrics {
    pub num_queries: usize,
    /// Share of labelled queries whose intent matched; `None` if none were labelled.
    pub intent_accuracy: Option<f64>,
    pub abstention_accuracy: Option<f64>,
    pub mrr: f64,
    pub recall_at: HashMap<usize, f64>,
    pub precision_at: HashMap<usize, f64>,
    pub hit_rate_at: HashMap<usize, f64>,
    pub per_query: Vec<QueryMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    pub query: String,
    pub intent: Intent,
    pub intent_correct: Option<bool>,
    pub abstention_correct: Option<bool>,
    pub reciprocal_rank: f64,
    pub recall_at_k: HashMap<usize, f64>,
    pub precision_at_k: HashMap<usize, f64>,
    pub num_relevant: usize,
}

fn ratio(hits: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

/// Evaluate every query. Ranking metrics are averaged over the queries
/// that name at least one relevant document.
pub fn evaluate<F>(eval_set: &[EvalQuery], k_values: &[usize], mut run_fn: F) -> EvalMetrics
where
    F: FnMut(&str) -> EvalRun,
{
    let mut per_query = Vec::with_capacity(eval_set.len());
    let mut mrr_sum = 0.0;
    let mut recall_sums: HashMap<usize, f64> = HashMap::new();
    let mut precision_sums: HashMap<usize, f64> = HashMap::new();
    let mut hit_sums: HashMap<usize, f64> = HashMap::new();
    let (mut intent_hits, mut intent_total) = (0, 0);
    let (mut abstain_hits, mut abstain_total) = (0, 0);
    let mut ranked_queries = 0usize;

    for eval_query in eval_set {
        let run = run_fn(&eval_query.query);
        let qm = evaluate_single(eval_query, &run, k_values);

        if let Some(correct) = qm.intent_correct {
            intent_total += 1;
            intent_hits += usize::from(correct);
        }
        if let Some(correct) = qm.abstention_correct {
            abstain_total += 1;
            abstain_hits += usize::from(correct);
        }

        if qm.num_relevant > 0 {
            ranked_queries += 1;
            mrr_sum += qm.reciprocal_rank;
            for &k in k_values {
                let recall = qm.recall_at_k.get(&k).copied().unwrap_or(0.0);
                *recall_sums.entry(k).or_default() += recall;
                *precision_sums.entry(k).or_default() += qm.precision_at_k.get(&k).copied().unwrap_or(0.0);
                if recall > 0.0 {
                    *hit_sums.entry(k).or_default() += 1.0;
                }
            }
        }

        per_query.push(qm);
    }

    let n = ranked_queries.max(1) as f64;
    let average = |sums: &HashMap<usize, f64>| -> HashMap<usize, f64> {
        k_values
            .iter()
            .map(|k| (*k, sums.get(k).copied().unwrap_or(0.0) / n))
            .collect()
    };

    EvalMetrics {
        num_queries: eval_set.len(),
        intent_accuracy: ratio(intent_hits, intent_total),
        abstention_accuracy: ratio(abstain_hits, abstain_total),
        mrr: mrr_sum / n,
        recall_at: average(&recall_sums),
        precision_at: average(&precision_sums),
        hit_rate_at: average(&hit_sums),
        per_query,
    }
}

fn evaluate_single(eval_query: &EvalQuery, run: &EvalRun, k_values: &[usize]) -> QueryMetrics {
    let relevant = &eval_query.relevant_documents;

    // Repeated ids count once, at their best rank.
    let mut seen = HashSet::new();
    let ranked: Vec<&str> = run
        .documents
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();

    let reciprocal_rank = ranked
        .iter()
        .position(|id| relevant.contains(*id))
        .map(|idx| 1.0 / (idx + 1) as f64)
        .unwrap_or(0.0);

    let mut recall_at_k = HashMap::new();
    let mut precision_at_k = HashMap::new();
    for &k in k_values {
        let top_k = &ranked[..ranked.len().min(k)];
        let hits = top_k.iter().filter(|id| relevant.contains(**id)).count();
        recall_at_k.insert(k, ratio(hits, relevant.len()).unwrap_or(0.0));
        precision_at_k.insert(k, ratio(hits, top_k.len()).unwrap_or(0.0));
    }

    QueryMetrics {
        query: eval_query.query.clone(),
        intent: run.intent,
        intent_correct: eval_query.expected_intent.map(|expected| expected == run.intent),
        abstention_correct: eval_query.expect_abstain.map(|expected| expected == run.abstained),
        reciprocal_rank,
        recall_at_k,
        precision_at_k,
        num_relevant: relevant.len(),
    }
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Format evaluation metrics as a human-readable report.
pub fn format_report(metrics: &EvalMetrics) -> String {
    let mut report = String::new();

    report.push_str(&format!(
        "=== Question Answering Evaluation ({} queries) ===\n\n",
        metrics.num_queries
    ));
    report.push_str(&format!("Intent accuracy:     {}\n", percent(metrics.intent_accuracy)));
    report.push_str(&format!("Abstention accuracy: {}\n", percent(metrics.abstention_accuracy)));
    report.push_str(&format!("MRR: {:.4}\n\n", metrics.mrr));

    let mut k_values: Vec<usize> = metrics.recall_at.keys().copied().collect();
    k_values.sort_unstable();

    report.push_str("| K  | Recall | Precision | Hit Rate |\n");
    report.push_str("|----|--------|-----------|----------|\n");
    for &k in &k_values {
        report.push_str(&format!(
            "| {:2} | {:.4} | {:.4}    | {:.4}   |\n",
            k,
            metrics.recall_at.get(&k).copied().unwrap_or(0.0),
            metrics.precision_at.get(&k).copied().unwrap_or(0.0),
            metrics.hit_rate_at.get(&k).copied().unwrap_or(0.0),
        ));
    }

    let misclassified: Vec<&QueryMetrics> = metrics
        .per_query
        .iter()
        .filter(|q| q.intent_correct == Some(false))
        .collect();
    if !misclassified.is_empty() {
        report.push_str(&format!("\n--- Misclassified ({}) ---\n", misclassified.len()));
        for q in &misclassified {
            report.push_str(&format!("  - \"{}\" classified as {}\n", q.query, q.intent.as_str()));
        }
    }

    let missed: Vec<&QueryMetrics> = metrics
        .per_query
        .iter()
        .filter(|q| q.num_relevant > 0 && q.reciprocal_rank == 0.0)
        .collect();
    if !missed.is_empty() {
        report.push_str(&format!("\n--- No relevant document retrieved ({}) ---\n", missed.len()));
        for q in &missed {
            report.push_str(&format!("  - \"{}\" (expected {} documents)\n", q.query, q.num_relevant));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(intent: Intent, ids: &[&str]) -> EvalRun {
        EvalRun {
            intent,
            documents: ids.iter().map(|s| s.to_string()).collect(),
            abstained: ids.is_empty(),
        }
    }

    #[test]
    fn test_ranking_metrics() {
        let eval_set = vec![EvalQuery::new("what did we decide on the event bus")
            .relevant(["ADR.0012", "PCP.0015"])];

        let metrics = evaluate(&eval_set, &[1, 3], |_| {
            run(Intent::SemanticAnswer, &["ADR.0012", "ADR.0001", "PCP.0015"])
        });

        assert_eq!(metrics.mrr, 1.0);
        assert_eq!(metrics.recall_at[&1], 0.5);
        assert_eq!(metrics.recall_at[&3], 1.0);
        assert_eq!(metrics.precision_at[&1], 1.0);
        assert_eq!(metrics.hit_rate_at[&1], 1.0);
        assert_eq!(metrics.intent_accuracy, None);
    }

    #[test]
    fn test_duplicate_documents_count_once() {
        let eval_set = vec![EvalQuery::new("q").relevant(["PCP.0015"])];
        let metrics = evaluate(&eval_set, &[2], |_| {
            run(Intent::SemanticAnswer, &["ADR.0012", "ADR.0012", "PCP.0015"])
        });
        assert!((metrics.mrr - 0.5).abs() < 1e-10);
        assert_eq!(metrics.recall_at[&2], 1.0);
    }

    #[test]
    fn test_intent_and_abstention_accuracy() {
        let eval_set = vec![
            EvalQuery::new("List all ADRs").expecting(Intent::Listing),
            EvalQuery::new("How many principles").expecting(Intent::Counting),
            EvalQuery::new("What is the weather").expecting(Intent::OffTopic).abstains(true),
        ];

        let metrics = evaluate(&eval_set, &[5], |query| match query {
            "List all ADRs" => run(Intent::Listing, &["ADR.0001"]),
            "How many principles" => run(Intent::Listing, &["PCP.0010"]),
            _ => run(Intent::OffTopic, &[]),
        });

        assert!((metrics.intent_accuracy.unwrap() - 2.0 / 3.0).abs() < 1e-10);
        assert_eq!(metrics.abstention_accuracy, Some(1.0));
        // No query names relevant documents, so ranking stays at zero.
        assert_eq!(metrics.mrr, 0.0);

        let report = format_report(&metrics);
        assert!(report.contains("Intent accuracy:     66.7%"));
        assert!(report.contains("\"How many principles\" classified as listing"));
    }

    #[test]
    fn test_unlabelled_queries_do_not_dilute_ranking() {
        let eval_set = vec![
            EvalQuery::new("q1").relevant(["ADR.0012"]),
            EvalQuery::new("hello").expecting(Intent::Conversational),
        ];
        let metrics = evaluate(&eval_set, &[3], |query| {
            if query == "q1" {
                run(Intent::SemanticAnswer, &["ADR.0012"])
            } else {
                run(Intent::Conversational, &[])
            }
        });
        assert_eq!(metrics.mrr, 1.0);
        assert_eq!(metrics.hit_rate_at[&3], 1.0);
    }

    #[test]
    fn test_report_lists_missed_queries() {
        let eval_set = vec![EvalQuery::new("missing").relevant(["POL.0510"])];
        let metrics = evaluate(&eval_set, &[1, 5], |_| run(Intent::SemanticAnswer, &["ADR.0012"]));
        let report = format_report(&metrics);
        assert!(report.contains("MRR: 0.0000"));
        assert!(report.contains("\"missing\" (expected 1 documents)"));
    }
}
