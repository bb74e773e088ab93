//! Query understanding and answer decisions: normalization, reference
//! resolution, intent classification, follow-up binding, the confidence
//! gate, answer templates and offline evaluation.

pub mod analyzer;
pub mod doc_reference;
pub mod eval;
pub mod intent;
pub mod normalize;
pub mod patterns;
pub mod query_rewriter;
pub mod retrieval_decision;
pub mod synthesis;

pub use analyzer::{QueryAnalysis, QueryAnalyzer};
pub use doc_reference::{DocReferenceResolver, ReferenceExtraction};
pub use eval::{evaluate, format_report, EvalMetrics, EvalQuery, EvalRun, QueryMetrics};
pub use intent::{Classification, IntentClassifier, ReferenceSignals};
pub use normalize::{NormalizedQuery, Normalizer};
pub use query_rewriter::{QueryRewriter, RewrittenQuery};
pub use retrieval_decision::{AbstentionReason, ConfidenceGate, GateDecision, GateInput};
pub use synthesis::{fallback_summary, synthesize_or_fallback, AnswerSynthesizer};
