//! Answer synthesis.
//!
//! An optional external synthesizer turns evidence into prose. When none is
//! configured, or it fails, a templated answer is built from the evidence so
//! callers always get something to show.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Chunk, DocumentType};

const SNIPPET_CHARS: usize = 200;
const FALLBACK_EVIDENCE: usize = 3;

#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn synthesize(&self, query: &str, evidence: &[Chunk]) -> Result<String>;
}

fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_CHARS {
        collapsed
    } else {
        let cut: String = collapsed.chars().take(SNIPPET_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

fn label(chunk: &Chunk) -> String {
    match (&chunk.document_id, chunk.document_title.is_empty()) {
        (Some(id), false) => format!("{} {}", id, chunk.document_title),
        (Some(id), true) => id.clone(),
        (None, false) => chunk.document_title.clone(),
        (None, true) => chunk.id.clone(),
    }
}

/// Templated summary of the top evidence.
pub fn fallback_summary(evidence: &[Chunk]) -> String {
    let points = evidence
        .iter()
        .take(FALLBACK_EVIDENCE)
        .map(|c| format!("- [{}] {}", label(c), snippet(&c.content)))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Based on the available information:\n{}", points)
}

/// One line per distinct document, in the given order.
pub fn listing_answer(subject: Option<DocumentType>, documents: &[Chunk]) -> String {
    let noun = subject.map(|s| s.plural_label()).unwrap_or("documents");
    if documents.is_empty() {
        return format!("No {} were found.", noun);
    }
    let lines = documents
        .iter()
        .map(|c| format!("- {}", label(c)))
        .collect::<Vec<_>>()
        .join("\n");
    let noun = match (documents.len(), subject) {
        (1, Some(s)) => s.singular_label(),
        (1, None) => "document",
        _ => noun,
    };
    format!("Found {} {}:\n{}", documents.len(), noun, lines)
}

pub fn counting_answer(subject: Option<DocumentType>, count: usize) -> String {
    let noun = subject.map(|s| s.plural_label()).unwrap_or("documents");
    format!("Number of {}: {}.", noun, count)
}

/// Use the synthesizer when present; fall back to the template otherwise.
pub async fn synthesize_or_fallback(
    synthesizer: Option<&dyn AnswerSynthesizer>,
    query: &str,
    evidence: &[Chunk],
) -> (String, bool) {
    if let Some(synthesizer) = synthesizer {
        match synthesizer.synthesize(query, evidence).await {
            Ok(answer) if !answer.trim().is_empty() => return (answer, true),
            Ok(_) => tracing::warn!("Answer synthesizer returned an empty answer, using fallback"),
            Err(e) => tracing::warn!(error = %e, "Answer synthesis failed, using fallback"),
        }
    }
    (fallback_summary(evidence), false)
}
