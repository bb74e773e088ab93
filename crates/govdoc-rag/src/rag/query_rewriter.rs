//! Query Rewriting Module
//!
//! Binds elliptic follow-ups ("list them", "what about it?") to the
//! conversation. The pronoun is replaced by the documents or the document
//! type observed in the previous successful turn, so the rewritten query
//! classifies like a self-contained one.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::ConversationState;

static PRONOUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:them|those|these|it|that|this|ze|die|deze|dat|het)\b")
        .expect("pronoun regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenQuery {
    pub original_query: String,
    pub rewritten_query: String,
    /// Human-readable note on what the pronoun was bound to.
    pub explanation: String,
    pub used_context: bool,
}

impl RewrittenQuery {
    fn unchanged(query: &str, explanation: &str) -> Self {
        Self {
            original_query: query.to_string(),
            rewritten_query: query.to_string(),
            explanation: explanation.to_string(),
            used_context: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRewriter;

impl QueryRewriter {
    pub fn new() -> Self {
        Self
    }

    /// Replace the last pronoun with the previous turn's references or, when
    /// it had none, with the plural label of its subject. Never invents a
    /// subject: without usable state the query is returned unchanged.
    pub fn bind_follow_up(&self, query: &str, state: Option<&ConversationState>) -> RewrittenQuery {
        let Some(state) = state else {
            return RewrittenQuery::unchanged(query, "no conversation state");
        };

        let (replacement, explanation) = if !state.last_doc_refs.is_empty() {
            let refs = state.last_doc_refs.join(", ");
            let explanation = format!("bound to references {}", refs);
            (refs, explanation)
        } else if let Some(subject) = state.last_subject {
            let label = subject.plural_label().to_string();
            let explanation = format!("bound to subject {}", label);
            (label, explanation)
        } else {
            return RewrittenQuery::unchanged(query, "conversation has nothing to bind to");
        };

        let Some(pronoun) = PRONOUN_RE.find_iter(query).last() else {
            return RewrittenQuery::unchanged(query, "no pronoun to bind");
        };

        let mut rewritten = String::with_capacity(query.len() + replacement.len());
        rewritten.push_str(&query[..pronoun.start()]);
        rewritten.push_str(&replacement);
        rewritten.push_str(&query[pronoun.end()..]);

        tracing::debug!(
            original = query,
            rewritten = rewritten.as_str(),
            "Follow-up bound to conversation"
        );

        RewrittenQuery {
            original_query: query.to_string(),
            rewritten_query: rewritten,
            explanation,
            used_context: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;
    use chrono::Utc;

    fn state(refs: &[&str], subject: Option<DocumentType>) -> ConversationState {
        ConversationState {
            last_doc_refs: refs.iter().map(|r| r.to_string()).collect(),
            last_subject: subject,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_binds_to_previous_references() {
        let rewriter = QueryRewriter::new();
        let s = state(&["ADR.0012"], Some(DocumentType::DecisionRecord));
        let r = rewriter.bind_follow_up("what about it?", Some(&s));
        assert!(r.used_context);
        assert_eq!(r.rewritten_query, "what about ADR.0012?");
    }

    #[test]
    fn test_binds_to_previous_subject() {
        let rewriter = QueryRewriter::new();
        let s = state(&[], Some(DocumentType::Principle));
        let r = rewriter.bind_follow_up("list them", Some(&s));
        assert_eq!(r.rewritten_query, "list principles");
    }

    #[test]
    fn test_multiple_references_are_joined() {
        let rewriter = QueryRewriter::new();
        let s = state(&["ADR.0012", "ADR.0014"], None);
        let r = rewriter.bind_follow_up("show those", Some(&s));
        assert_eq!(r.rewritten_query, "show ADR.0012, ADR.0014");
    }

    #[test]
    fn test_without_state_query_is_unchanged() {
        let rewriter = QueryRewriter::new();
        let r = rewriter.bind_follow_up("list them", None);
        assert!(!r.used_context);
        assert_eq!(r.rewritten_query, "list them");

        let empty = state(&[], None);
        assert!(!rewriter.bind_follow_up("list them", Some(&empty)).used_context);
    }
}
