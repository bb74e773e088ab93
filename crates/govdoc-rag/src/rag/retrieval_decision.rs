//! Retrieval Decision System
//!
//! Go/no-go decision on retrieved evidence. The gate either accepts with a
//! confidence or abstains with a reason and a handful of deterministic
//! refinement suggestions. Pure: same inputs, same decision.

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, Family};
use crate::error::ConfigError;
use crate::types::{split_canonical_id, Intent, RetrievalResult};

/// Hard cap on suggestions per abstention.
const MAX_SUGGESTIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbstentionReason {
    NoResults,
    /// Every retrieval partition failed; not the same as "no matches".
    StoreUnavailable,
    LowConfidence { best_score: f32, threshold: f32 },
    MissingReference { ids: Vec<String> },
    AmbiguousReference { candidates: Vec<String> },
    /// A follow-up ("list them") with nothing earlier in the conversation to bind to.
    UnresolvedFollowUp,
    OffTopic,
}

impl AbstentionReason {
    pub fn message(&self) -> String {
        match self {
            AbstentionReason::NoResults => "no relevant documents found".to_string(),
            AbstentionReason::StoreUnavailable => {
                "document store unavailable; no retrieval partition could be reached".to_string()
            }
            AbstentionReason::LowConfidence { best_score, threshold } => format!(
                "best match score {:.3} is below the confidence threshold {:.2}",
                best_score, threshold
            ),
            AbstentionReason::MissingReference { ids } => {
                format!("referenced document {} was not found", ids.join(", "))
            }
            AbstentionReason::AmbiguousReference { candidates } => {
                format!("reference is ambiguous between {}", candidates.join(", "))
            }
            AbstentionReason::UnresolvedFollowUp => {
                "nothing earlier in the conversation to refer back to".to_string()
            }
            AbstentionReason::OffTopic => "question is outside the governed document corpus".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accept { confidence: f32 },
    Abstain {
        reason: AbstentionReason,
        suggestions: Vec<String>,
    },
}

impl GateDecision {
    pub fn is_abstain(&self) -> bool {
        matches!(self, GateDecision::Abstain { .. })
    }
}

/// Everything the gate looks at for one query.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub intent: Intent,
    pub results: &'a [RetrievalResult],
    /// Every retrieval partition failed.
    pub total_failure: bool,
    /// Canonical ids the query asked for explicitly.
    pub requested_ids: &'a [String],
    /// Results came from an exact id/range predicate, not similarity search.
    pub canonical_match: bool,
}

pub struct ConfidenceGate {
    threshold: f32,
    max_suggestions: usize,
    families: Vec<Family>,
}

impl ConfidenceGate {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: config.gate.min_score_threshold,
            max_suggestions: config.gate.max_suggestions.clamp(1, MAX_SUGGESTIONS),
            families: config.families()?,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Apply the gate rules in order; the first that matches decides.
    pub fn evaluate(&self, input: &GateInput<'_>) -> GateDecision {
        let enumeration = input.intent.is_enumeration();

        if input.results.is_empty() {
            if input.total_failure {
                return self.abstain(AbstentionReason::StoreUnavailable);
            }
            if enumeration {
                // A successful enumeration that found nothing is a confident zero.
                return GateDecision::Accept { confidence: 1.0 };
            }
            return self.abstain(AbstentionReason::NoResults);
        }

        if enumeration {
            return GateDecision::Accept { confidence: 1.0 };
        }

        let best_score = input
            .results
            .iter()
            .map(|r| r.blended_score)
            .fold(0.0f32, f32::max);
        if best_score < self.threshold {
            return self.abstain(AbstentionReason::LowConfidence {
                best_score,
                threshold: self.threshold,
            });
        }

        let missing: Vec<String> = input
            .requested_ids
            .iter()
            .filter(|id| {
                !input
                    .results
                    .iter()
                    .any(|r| r.chunk.document_id.as_deref() == Some(id.as_str()))
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return self.abstain(AbstentionReason::MissingReference { ids: missing });
        }

        let confidence = if input.canonical_match {
            1.0
        } else {
            input.results[0].blended_score
        };
        GateDecision::Accept { confidence }
    }

    pub fn abstain(&self, reason: AbstentionReason) -> GateDecision {
        let suggestions = self.suggestions(&reason);
        tracing::info!(reason = reason.message().as_str(), "Abstaining");
        GateDecision::Abstain { reason, suggestions }
    }

    /// Deterministic refinement suggestions for an abstention reason.
    pub fn suggestions(&self, reason: &AbstentionReason) -> Vec<String> {
        let example_id = self
            .families
            .first()
            .map(|f| crate::types::canonical_id(&f.prefix, f.min_number))
            .unwrap_or_else(|| "ADR.0001".to_string());

        let mut suggestions = match reason {
            AbstentionReason::NoResults => vec![
                "Try rephrasing the question with different keywords".to_string(),
                format!("Check that the topic is covered by the {}", self.family_labels()),
                format!("Reference a document directly by its id, e.g. {}", example_id),
            ],
            AbstentionReason::StoreUnavailable => vec![
                "The document store could not be reached; try again shortly".to_string(),
                "If the problem persists, contact the maintainers of the document index".to_string(),
            ],
            AbstentionReason::LowConfidence { .. } => vec![
                "Add more specific terms to the question".to_string(),
                "Name the document type you are interested in, e.g. principles or policies".to_string(),
                format!("Reference a document directly by its id, e.g. {}", example_id),
            ],
            AbstentionReason::MissingReference { ids } => {
                let id = ids.first().cloned().unwrap_or_default();
                let mut s = vec![
                    format!("Verify the identifier {}", id),
                    format!("Try a semantic search describing the topic of {} instead", id),
                ];
                if let Some(family) = split_canonical_id(&id)
                    .and_then(|(prefix, _)| self.families.iter().find(|f| f.prefix == prefix))
                {
                    s.push(format!(
                        "List all {} to find the right number",
                        family.document_type.plural_label()
                    ));
                }
                s
            }
            AbstentionReason::AmbiguousReference { candidates } => {
                let mut s: Vec<String> = candidates
                    .iter()
                    .map(|c| format!("Did you mean {}?", c))
                    .collect();
                s.push(format!("Add the document prefix to the number, e.g. {}", example_id));
                s
            }
            AbstentionReason::UnresolvedFollowUp => vec![
                format!("Name the documents you mean, e.g. {}", example_id),
                format!("Name the document type, e.g. \"list all {}\"", self.first_label()),
            ],
            AbstentionReason::OffTopic => self
                .families
                .iter()
                .map(|f| format!("Ask about {} ({})", f.document_type.plural_label(), f.prefix))
                .collect(),
        };

        suggestions.truncate(self.max_suggestions);
        suggestions
    }

    fn first_label(&self) -> &'static str {
        self.families
            .first()
            .map(|f| f.document_type.plural_label())
            .unwrap_or("documents")
    }

    fn family_labels(&self) -> String {
        let labels: Vec<&str> = self
            .families
            .iter()
            .map(|f| f.document_type.plural_label())
            .collect();
        match labels.as_slice() {
            [] => "document corpus".to_string(),
            [one] => one.to_string(),
            [rest @ .., last] => format!("{} or {}", rest.join(", "), last),
        }
    }
}
