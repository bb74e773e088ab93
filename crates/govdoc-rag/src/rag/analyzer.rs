//! Query analysis: everything that happens to a query before retrieval.
//!
//! Normalizes the text, binds follow-ups to the conversation, resolves
//! document references (settling ambiguous numbers with conversation
//! context where possible), extracts signals and classifies the intent.

use crate::config::EngineConfig;
use crate::context::ConversationState;
use crate::error::ConfigError;
use crate::rag::doc_reference::{DocReferenceResolver, ReferenceExtraction};
use crate::rag::intent::{apply_reference_override, Classification, IntentClassifier, ReferenceSignals};
use crate::rag::normalize::{NormalizedQuery, Normalizer};
use crate::rag::query_rewriter::{QueryRewriter, RewrittenQuery};
use crate::types::{DocumentType, ExtractedSignals, Intent};

#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub normalized: NormalizedQuery,
    pub extraction: ReferenceExtraction,
    pub signals: ExtractedSignals,
    pub classification: Classification,
    /// Final intent, after the reference override.
    pub intent: Intent,
    pub override_applied: bool,
    /// Present when the query was an elliptic follow-up.
    pub rewrite: Option<RewrittenQuery>,
    /// Ids that were ambiguous in the text and settled by conversation context.
    pub disambiguated: Vec<String>,
    /// Document type the query is about: the family of the first resolved
    /// reference, else the first document type mentioned.
    pub subject: Option<DocumentType>,
    pub approval_requested: bool,
}

impl QueryAnalysis {
    pub fn follow_up_bound(&self) -> bool {
        self.rewrite.as_ref().is_some_and(|r| r.used_context)
    }

    /// Candidate ids of every reference that is still ambiguous.
    pub fn clarification_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for reference in self.extraction.ambiguous() {
            for candidate in &reference.candidates {
                if !candidates.contains(candidate) {
                    candidates.push(candidate.clone());
                }
            }
        }
        candidates
    }
}

pub struct QueryAnalyzer {
    normalizer: Normalizer,
    resolver: DocReferenceResolver,
    classifier: IntentClassifier,
    rewriter: QueryRewriter,
}

impl QueryAnalyzer {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            normalizer: Normalizer::new(&config.keywords.abbreviations),
            resolver: DocReferenceResolver::new(config)?,
            classifier: IntentClassifier::new(config)?,
            rewriter: QueryRewriter::new(),
        })
    }

    pub fn resolver(&self) -> &DocReferenceResolver {
        &self.resolver
    }

    pub fn analyze(&self, raw: &str, state: Option<&ConversationState>) -> QueryAnalysis {
        let mut normalized = self.normalizer.normalize(raw);
        let mut rewrite = None;
        let mut unresolved_follow_up = false;

        if self.classifier.is_follow_up(&normalized.text) && !self.carries_own_target(&normalized.text) {
            let rewritten = self.rewriter.bind_follow_up(&normalized.text, state);
            if rewritten.used_context {
                normalized = self.normalizer.normalize(&rewritten.rewritten_query);
                normalized.raw = raw.to_string();
            } else {
                unresolved_follow_up = true;
            }
            rewrite = Some(rewritten);
        }

        let mut extraction = self.resolver.extract(&normalized.text);
        let disambiguated = self.disambiguate_with_context(&mut extraction, state);

        let signals = self.classifier.signals(&normalized.text, !extraction.is_empty());
        let refs = ReferenceSignals {
            has_resolved: extraction.has_resolved(),
            has_ambiguous: extraction.has_ambiguous(),
            unresolved_follow_up,
        };
        let classification = self.classifier.classify(&signals, &refs);

        let (intent, override_applied) =
            match apply_reference_override(classification.intent, refs.has_resolved) {
                Some(overridden) => (overridden, true),
                None => (classification.intent, false),
            };

        let subject = extraction
            .resolved()
            .next()
            .and_then(|r| self.resolver.family(&r.prefix))
            .map(|f| f.document_type)
            .or(signals.subject);
        let approval_requested = signals.approval_keyword;

        tracing::debug!(
            query = normalized.text.as_str(),
            intent = %intent,
            rule = classification.rule.index,
            references = extraction.references.len(),
            "Query analyzed"
        );

        QueryAnalysis {
            normalized,
            extraction,
            signals,
            classification,
            intent,
            override_applied,
            rewrite,
            disambiguated,
            subject,
            approval_requested,
        }
    }

    /// A follow-up phrase that names its own documents or subject needs no binding.
    fn carries_own_target(&self, text: &str) -> bool {
        !self.resolver.extract(text).is_empty() || self.classifier.subjects().first_subject(text).is_some()
    }

    /// Resolve ambiguous bare numbers against the families the conversation
    /// was last about. Returns the ids that were settled this way.
    fn disambiguate_with_context(
        &self,
        extraction: &mut ReferenceExtraction,
        state: Option<&ConversationState>,
    ) -> Vec<String> {
        let Some(state) = state else {
            return Vec::new();
        };
        if !extraction.has_ambiguous() {
            return Vec::new();
        }

        let mut preferred = state.referenced_prefixes();
        if let Some(subject) = state.last_subject {
            for family in self.resolver.families() {
                if family.document_type == subject && !preferred.contains(&family.prefix) {
                    preferred.push(family.prefix.clone());
                }
            }
        }
        if preferred.is_empty() {
            return Vec::new();
        }

        let mut settled = Vec::new();
        for reference in extraction.references.iter_mut() {
            if let Some(resolved) = self.resolver.disambiguate(reference, &preferred) {
                if let Some(id) = resolved.canonical_id.clone() {
                    settled.push(id);
                }
                *reference = resolved;
            }
        }
        if !settled.is_empty() {
            extraction.refresh_ranges();
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(&EngineConfig::default()).unwrap()
    }

    fn state(refs: &[&str], subject: Option<DocumentType>) -> ConversationState {
        ConversationState {
            last_doc_refs: refs.iter().map(|r| r.to_string()).collect(),
            last_subject: subject,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_exact_reference() {
        let a = analyzer().analyze("ADR.0012", None);
        assert_eq!(a.intent, Intent::ExactLookup);
        assert_eq!(a.extraction.resolved_ids(), vec!["ADR.0012"]);
        assert_eq!(a.subject, Some(DocumentType::DecisionRecord));
    }

    #[test]
    fn test_ambiguous_number_without_context() {
        let a = analyzer().analyze("What does 22 decide?", None);
        assert_eq!(a.intent, Intent::ClarificationNeeded);
        assert_eq!(a.clarification_candidates(), vec!["ADR.0022", "PCP.0022"]);
    }

    #[test]
    fn test_ambiguous_number_settled_by_context() {
        let s = state(&["PCP.0015"], Some(DocumentType::Principle));
        let a = analyzer().analyze("What does 22 decide?", Some(&s));
        assert_eq!(a.intent, Intent::ExactLookup);
        assert_eq!(a.disambiguated, vec!["PCP.0022"]);
        assert_eq!(a.extraction.resolved_ids(), vec!["PCP.0022"]);
    }

    #[test]
    fn test_ambiguous_number_settled_by_subject_context() {
        let s = state(&[], Some(DocumentType::DecisionRecord));
        let a = analyzer().analyze("and 22?", Some(&s));
        assert_eq!(a.extraction.resolved_ids(), vec!["ADR.0022"]);
    }

    #[test]
    fn test_counts_and_rankings_keep_the_named_subject() {
        let a = analyzer().analyze("How many ADRs were approved in the last 12 months?", None);
        assert_eq!(a.intent, Intent::Counting);
        assert!(a.extraction.is_empty());
        assert_eq!(a.subject, Some(DocumentType::DecisionRecord));

        let a = analyzer().analyze("List the top 5 principles", None);
        assert_eq!(a.intent, Intent::Listing);
        assert!(a.extraction.is_empty());
        assert_eq!(a.subject, Some(DocumentType::Principle));

        let a = analyzer().analyze("What are the 3 most important principles for security?", None);
        assert_eq!(a.intent, Intent::SemanticAnswer);
        assert!(a.extraction.is_empty());
        assert_eq!(a.subject, Some(DocumentType::Principle));
    }

    #[test]
    fn test_follow_up_binds_subject() {
        let s = state(&[], Some(DocumentType::Principle));
        let a = analyzer().analyze("list them", Some(&s));
        assert!(a.follow_up_bound());
        assert_eq!(a.intent, Intent::Listing);
        assert_eq!(a.subject, Some(DocumentType::Principle));
        assert_eq!(a.normalized.raw, "list them");
    }

    #[test]
    fn test_follow_up_binds_references() {
        let s = state(&["ADR.0012"], Some(DocumentType::DecisionRecord));
        let a = analyzer().analyze("what about it?", Some(&s));
        assert_eq!(a.intent, Intent::ExactLookup);
        assert_eq!(a.extraction.resolved_ids(), vec!["ADR.0012"]);
    }

    #[test]
    fn test_unbound_follow_up_needs_clarification() {
        let a = analyzer().analyze("list them", None);
        assert_eq!(a.intent, Intent::ClarificationNeeded);
        assert!(!a.follow_up_bound());
        assert_eq!(a.subject, None);
    }

    #[test]
    fn test_alias_settles_reference_in_same_query() {
        let a = analyzer().analyze("Show PCP.22 decision", None);
        assert_eq!(a.intent, Intent::ExactLookup);
        assert_eq!(a.extraction.resolved_ids(), vec!["PCP.0022"]);
        assert_eq!(a.subject, Some(DocumentType::Principle));
    }

    #[test]
    fn test_reference_overrides_qualified_listing() {
        let a = analyzer().analyze("list ADR.12 regarding security", None);
        assert_eq!(a.extraction.resolved_ids(), vec!["ADR.0012"]);
        assert_eq!(a.classification.intent, Intent::SemanticAnswer);
        assert_eq!(a.intent, Intent::ExactLookup);
        assert!(a.override_applied);
    }

    #[test]
    fn test_listing_and_approval_flag() {
        let a = analyzer().analyze("List all approval records", None);
        assert_eq!(a.intent, Intent::Listing);
        assert!(a.approval_requested);
        assert_eq!(a.subject, Some(DocumentType::ApprovalRecord));
    }
}
