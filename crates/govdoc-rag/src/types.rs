use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of governed document a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    DecisionRecord,
    Principle,
    Policy,
    Terminology,
    ApprovalRecord,
    Template,
    Index,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::DecisionRecord,
        DocumentType::Principle,
        DocumentType::Policy,
        DocumentType::Terminology,
        DocumentType::ApprovalRecord,
        DocumentType::Template,
        DocumentType::Index,
    ];

    /// Types excluded from answer and listing retrieval unless explicitly requested.
    pub const DEFAULT_EXCLUDED: [DocumentType; 3] = [
        DocumentType::ApprovalRecord,
        DocumentType::Template,
        DocumentType::Index,
    ];

    /// Types searched by default for answers.
    pub const ANSWERABLE: [DocumentType; 4] = [
        DocumentType::DecisionRecord,
        DocumentType::Principle,
        DocumentType::Policy,
        DocumentType::Terminology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecisionRecord => "decision-record",
            Self::Principle => "principle",
            Self::Policy => "policy",
            Self::Terminology => "terminology",
            Self::ApprovalRecord => "approval-record",
            Self::Template => "template",
            Self::Index => "index",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    pub fn is_default_excluded(&self) -> bool {
        Self::DEFAULT_EXCLUDED.contains(self)
    }

    /// Human-readable plural label used in templated answers.
    pub fn plural_label(&self) -> &'static str {
        match self {
            Self::DecisionRecord => "decision records",
            Self::Principle => "principles",
            Self::Policy => "policy documents",
            Self::Terminology => "terminology entries",
            Self::ApprovalRecord => "approval records",
            Self::Template => "templates",
            Self::Index => "index documents",
        }
    }

    pub fn singular_label(&self) -> &'static str {
        match self {
            Self::DecisionRecord => "decision record",
            Self::Principle => "principle",
            Self::Policy => "policy document",
            Self::Terminology => "terminology entry",
            Self::ApprovalRecord => "approval record",
            Self::Template => "template",
            Self::Index => "index document",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of retrievable content produced by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    /// Canonical id such as "ADR.0012"; absent for terminology entries.
    pub document_id: Option<String>,
    pub document_type: DocumentType,
    #[serde(default)]
    pub document_title: String,
    #[serde(default)]
    pub section_label: String,
    #[serde(default)]
    pub owner_team: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub source_path: String,
}

impl Chunk {
    pub fn new(id: impl Into<String>, document_type: DocumentType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            document_id: None,
            document_type,
            document_title: String::new(),
            section_label: String::new(),
            owner_team: String::new(),
            embedding: None,
            source_path: String::new(),
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>, title: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self.document_title = title.into();
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section_label = section.into();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Key used for per-document deduplication; falls back to the chunk id.
    pub fn grouping_key(&self) -> &str {
        self.document_id
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.id)
    }
}

/// A pointer to a document extracted from query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReference {
    pub raw_text: String,
    /// Family code, e.g. "ADR". Empty for ambiguous bare numbers.
    pub prefix: String,
    /// Number zero-padded to four digits.
    pub number_value: String,
    pub canonical_id: Option<String>,
    pub is_ambiguous: bool,
    pub candidates: Vec<String>,
}

impl DocReference {
    pub fn resolved(raw_text: impl Into<String>, prefix: &str, number: u32) -> Self {
        Self {
            raw_text: raw_text.into(),
            prefix: prefix.to_string(),
            number_value: pad_number(number),
            canonical_id: Some(canonical_id(prefix, number)),
            is_ambiguous: false,
            candidates: Vec::new(),
        }
    }

    pub fn ambiguous(raw_text: impl Into<String>, number: u32, candidates: Vec<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            prefix: String::new(),
            number_value: pad_number(number),
            canonical_id: None,
            is_ambiguous: true,
            candidates,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.canonical_id.is_some() && !self.is_ambiguous
    }

    pub fn number(&self) -> Option<u32> {
        self.number_value.parse().ok()
    }
}

/// Inclusive numeric span within one family, produced by range/list expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub prefix: String,
    pub start: u32,
    pub end: u32,
}

impl ReferenceRange {
    pub fn contains(&self, number: u32) -> bool {
        (self.start..=self.end).contains(&number)
    }
}

pub fn pad_number(number: u32) -> String {
    format!("{:04}", number)
}

pub fn canonical_id(prefix: &str, number: u32) -> String {
    format!("{}.{}", prefix, pad_number(number))
}

/// Split a canonical id such as "ADR.0012" into its prefix and number.
pub fn split_canonical_id(id: &str) -> Option<(&str, u32)> {
    let (prefix, number) = id.split_once('.')?;
    let number = number.parse().ok()?;
    Some((prefix, number))
}

/// Closed set of query intents; exactly one is assigned per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ExactLookup,
    Listing,
    Counting,
    SemanticAnswer,
    TerminologyLookup,
    Conversational,
    OffTopic,
    ClarificationNeeded,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactLookup => "exact_lookup",
            Self::Listing => "listing",
            Self::Counting => "counting",
            Self::SemanticAnswer => "semantic_answer",
            Self::TerminologyLookup => "terminology_lookup",
            Self::Conversational => "conversational",
            Self::OffTopic => "off_topic",
            Self::ClarificationNeeded => "clarification_needed",
        }
    }

    /// Enumeration intents are judged on execution success, not on scores.
    pub fn is_enumeration(&self) -> bool {
        matches!(self, Self::Listing | Self::Counting)
    }

    pub fn needs_retrieval(&self) -> bool {
        !matches!(
            self,
            Self::Conversational | Self::OffTopic | Self::ClarificationNeeded
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected query language. `Both` is the fallback when detection is unsure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// English
    Primary,
    /// Dutch
    Secondary,
    Both,
}

/// Pattern signals extracted from a normalized query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSignals {
    pub token_count: usize,
    pub list_verb: bool,
    /// Topical filter attached to a list request, e.g. "about interoperability".
    pub scoping_qualifier: Option<String>,
    pub count_pattern: bool,
    pub question_word: bool,
    pub trigger_terms: Vec<String>,
    pub subject: Option<DocumentType>,
    pub approval_keyword: bool,
    pub follow_up_pattern: bool,
    pub conversational_phrase: bool,
    pub domain_cue: bool,
}

/// One ranked candidate returned by the hybrid retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub lexical_score: f32,
    pub vector_score: f32,
    pub blended_score: f32,
    pub rank: usize,
}

/// Flattened projection of a result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultProjection {
    pub rank: usize,
    pub chunk_id: String,
    pub document_id: Option<String>,
    pub document_type: DocumentType,
    pub document_title: String,
    pub section_label: String,
    pub owner_team: String,
    pub source_path: String,
    pub content: String,
    pub lexical_score: f32,
    pub vector_score: f32,
    pub blended_score: f32,
}

impl From<&RetrievalResult> for ResultProjection {
    fn from(result: &RetrievalResult) -> Self {
        let chunk = &result.chunk;
        Self {
            rank: result.rank,
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            document_type: chunk.document_type,
            document_title: chunk.document_title.clone(),
            section_label: chunk.section_label.clone(),
            owner_team: chunk.owner_team.clone(),
            source_path: chunk.source_path.clone(),
            content: chunk.content.clone(),
            lexical_score: result.lexical_score,
            vector_score: result.vector_score,
            blended_score: result.blended_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_padding() {
        assert_eq!(canonical_id("ADR", 12), "ADR.0012");
        assert_eq!(canonical_id("PCP", 1234), "PCP.1234");
        assert_eq!(split_canonical_id("PCP.0022"), Some(("PCP", 22)));
        assert_eq!(split_canonical_id("nonsense"), None);
    }

    #[test]
    fn test_document_type_serde_is_kebab_case() {
        let json = serde_json::to_string(&DocumentType::ApprovalRecord).unwrap();
        assert_eq!(json, "\"approval-record\"");
        assert_eq!(DocumentType::parse("decision-record"), Some(DocumentType::DecisionRecord));
        assert_eq!(DocumentType::parse("memo"), None);
    }

    #[test]
    fn test_grouping_key_falls_back_to_chunk_id() {
        let term = Chunk::new("t-1", DocumentType::Terminology, "Interoperability: ...");
        assert_eq!(term.grouping_key(), "t-1");

        let adr = Chunk::new("c-1", DocumentType::DecisionRecord, "...")
            .with_document("ADR.0012", "Use OAuth");
        assert_eq!(adr.grouping_key(), "ADR.0012");
    }
}
