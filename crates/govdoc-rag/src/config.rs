use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{DocumentType, Intent};

/// Engine configuration, loaded once at startup and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub families: Vec<FamilyConfig>,
    pub keywords: KeywordConfig,
    pub retrieval: RetrievalConfig,
    pub gate: GateConfig,
    pub context: ContextConfig,
    pub features: FeatureFlags,
}

/// A document family: prefix, document type and reserved number range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub prefix: String,
    /// Kebab-case document type, e.g. "decision-record".
    pub document_type: String,
    pub min_number: u32,
    pub max_number: u32,
}

/// Validated family used by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub prefix: String,
    pub document_type: DocumentType,
    pub min_number: u32,
    pub max_number: u32,
}

impl Family {
    pub fn contains(&self, number: u32) -> bool {
        (self.min_number..=self.max_number).contains(&number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAliases {
    pub document_type: DocumentType,
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Domain terms that mark a query as asking for an explained answer.
    pub semantic_triggers: Vec<String>,
    /// Vocabulary of the corpus' subject area, used to tell domain from off-topic queries.
    pub domain_terms: Vec<String>,
    /// Words that name a document type, e.g. "principles" or "ADRs".
    pub subject_aliases: Vec<SubjectAliases>,
    /// Words that request approval records explicitly.
    pub approval_keywords: Vec<String>,
    /// Abbreviation → expansion appended to the search text.
    pub abbreviations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaPresets {
    pub exact_lookup: f32,
    pub semantic_answer: f32,
    pub terminology_lookup: f32,
    pub enumeration: f32,
}

impl AlphaPresets {
    pub fn for_intent(&self, intent: Intent) -> f32 {
        match intent {
            Intent::ExactLookup => self.exact_lookup,
            Intent::TerminologyLookup => self.terminology_lookup,
            Intent::Listing | Intent::Counting => self.enumeration,
            _ => self.semantic_answer,
        }
    }
}

impl Default for AlphaPresets {
    fn default() -> Self {
        Self {
            exact_lookup: 0.5,
            semantic_answer: 0.7,
            terminology_lookup: 0.3,
            enumeration: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeLimit {
    pub document_type: DocumentType,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub alpha: AlphaPresets,
    /// Limit for document types without an explicit entry in `type_limits`.
    pub default_limit: usize,
    pub type_limits: Vec<TypeLimit>,
    /// Store candidates requested per result slot, leaving room for deduplication.
    pub candidate_multiplier: usize,
    /// Upper bound for listing and counting enumerations.
    pub enumeration_limit: usize,
    /// Upper bound for exact-id and range lookups.
    pub lookup_limit: usize,
    pub terminology_limit: usize,
    /// Per-partition timeout; expiry counts as a partition failure.
    pub partition_timeout_ms: Option<u64>,
}

impl RetrievalConfig {
    pub fn limit_for(&self, document_type: DocumentType) -> usize {
        self.type_limits
            .iter()
            .find(|t| t.document_type == document_type)
            .map(|t| t.limit)
            .unwrap_or(self.default_limit)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: AlphaPresets::default(),
            default_limit: 5,
            type_limits: vec![
                TypeLimit { document_type: DocumentType::DecisionRecord, limit: 8 },
                TypeLimit { document_type: DocumentType::Principle, limit: 8 },
                TypeLimit { document_type: DocumentType::Policy, limit: 5 },
                TypeLimit { document_type: DocumentType::Terminology, limit: 5 },
            ],
            candidate_multiplier: 3,
            enumeration_limit: 500,
            lookup_limit: 200,
            terminology_limit: 3,
            partition_timeout_ms: Some(5_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Best blended score below this abstains.
    pub min_score_threshold: f32,
    pub max_suggestions: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_score_threshold: 0.5,
            max_suggestions: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_conversations: usize,
    /// Conversation state older than this is treated as absent.
    pub ttl_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_conversations: 10_000,
            ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Attach matching terminology entries to semantic answers.
    pub terminology_enrichment: bool,
    /// Call the answer synthesizer when one is configured.
    pub synthesize_answers: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            terminology_enrichment: true,
            synthesize_answers: true,
        }
    }
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.families()?;

        let alpha = &self.retrieval.alpha;
        for (field, value) in [
            ("retrieval.alpha.exact_lookup", alpha.exact_lookup),
            ("retrieval.alpha.semantic_answer", alpha.semantic_answer),
            ("retrieval.alpha.terminology_lookup", alpha.terminology_lookup),
            ("retrieval.alpha.enumeration", alpha.enumeration),
            ("gate.min_score_threshold", self.gate.min_score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange {
                    field: field.to_string(),
                    value,
                });
            }
        }

        for (field, value) in [
            ("retrieval.default_limit", self.retrieval.default_limit),
            ("retrieval.candidate_multiplier", self.retrieval.candidate_multiplier),
            ("retrieval.enumeration_limit", self.retrieval.enumeration_limit),
            ("retrieval.lookup_limit", self.retrieval.lookup_limit),
            ("retrieval.terminology_limit", self.retrieval.terminology_limit),
            ("gate.max_suggestions", self.gate.max_suggestions),
            ("context.max_conversations", self.context.max_conversations),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field.to_string()));
            }
        }
        if self.retrieval.type_limits.iter().any(|t| t.limit == 0) {
            return Err(ConfigError::Zero("retrieval.type_limits[].limit".to_string()));
        }
        if self.retrieval.partition_timeout_ms == Some(0) {
            return Err(ConfigError::Zero("retrieval.partition_timeout_ms".to_string()));
        }

        Ok(())
    }

    /// Resolve the configured families, rejecting unknown document types,
    /// malformed prefixes, inverted ranges and duplicate prefixes.
    pub fn families(&self) -> Result<Vec<Family>, ConfigError> {
        let mut seen = HashSet::new();
        let mut families = Vec::with_capacity(self.families.len());

        for family in &self.families {
            let prefix = family.prefix.trim().to_uppercase();
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::InvalidPrefix(family.prefix.clone()));
            }
            if !seen.insert(prefix.clone()) {
                return Err(ConfigError::DuplicateFamily(prefix));
            }
            let document_type = DocumentType::parse(&family.document_type).ok_or_else(|| {
                ConfigError::UnknownDocumentType {
                    prefix: prefix.clone(),
                    document_type: family.document_type.clone(),
                }
            })?;
            if family.min_number > family.max_number || family.max_number > 9_999 {
                return Err(ConfigError::InvalidRange {
                    prefix,
                    min: family.min_number,
                    max: family.max_number,
                });
            }
            families.push(Family {
                prefix,
                document_type,
                min_number: family.min_number,
                max_number: family.max_number,
            });
        }

        Ok(families)
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordConfig {
    fn default() -> Self {
        let subject_aliases = vec![
            SubjectAliases {
                document_type: DocumentType::DecisionRecord,
                terms: strings(&[
                    "adr", "adrs", "decision", "decisions", "decision record",
                    "decision records", "architecture decision", "architecture decisions",
                    "beslissing", "beslissingen", "besluit", "besluiten",
                ]),
            },
            SubjectAliases {
                document_type: DocumentType::Principle,
                terms: strings(&[
                    "pcp", "pcps", "principle", "principles", "guiding principle",
                    "guiding principles", "principe", "principes",
                ]),
            },
            SubjectAliases {
                document_type: DocumentType::Policy,
                terms: strings(&["pol", "policy", "policies", "policy document", "beleid"]),
            },
            SubjectAliases {
                document_type: DocumentType::Terminology,
                terms: strings(&[
                    "term", "terms", "terminology", "glossary", "definition",
                    "definitions", "begrip", "begrippen",
                ]),
            },
            SubjectAliases {
                document_type: DocumentType::ApprovalRecord,
                terms: strings(&[
                    "dar", "dars", "approval record", "approval records", "approvals",
                    "goedkeuringen",
                ]),
            },
            SubjectAliases {
                document_type: DocumentType::Template,
                terms: strings(&["template", "templates", "sjabloon", "sjablonen"]),
            },
        ];

        let semantic_triggers = strings(&[
            "rationale", "consequence", "consequences", "impact", "implication",
            "implications", "trade-off", "trade-offs", "tradeoff", "decide", "decided",
            "requirement", "requirements", "compliance", "comply", "guideline",
            "guidelines", "describe", "summarize", "summary", "compare", "difference",
            "alternatives", "motivation", "context", "status", "waarom", "gevolgen",
            "samenvatting",
        ]);

        let mut domain_terms = strings(&[
            "architecture", "architectural", "interoperability", "security", "privacy",
            "data", "api", "apis", "integration", "cloud", "platform", "service",
            "services", "system", "systems", "standard", "standards", "governance",
            "document", "documents", "owner", "team", "identity", "authentication",
            "authorization", "oauth", "messaging", "event", "events", "storage",
            "infrastructure", "network", "software", "application", "applications",
            "energy", "grid", "model", "models", "component", "components",
        ]);
        domain_terms.extend(
            subject_aliases
                .iter()
                .flat_map(|s| s.terms.iter().cloned()),
        );

        let approval_keywords = strings(&[
            "approval", "approvals", "approved", "approve", "approver", "dar", "dars",
            "sign-off", "signed off", "goedkeuring", "goedgekeurd",
        ]);

        let abbreviations = [
            ("adr", "architecture decision record"),
            ("pcp", "principle"),
            ("dar", "decision approval record"),
            ("api", "application programming interface"),
            ("iam", "identity and access management"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            semantic_triggers,
            domain_terms,
            subject_aliases,
            approval_keywords,
            abbreviations,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            families: vec![
                FamilyConfig {
                    prefix: "ADR".to_string(),
                    document_type: "decision-record".to_string(),
                    min_number: 1,
                    max_number: 99,
                },
                FamilyConfig {
                    prefix: "PCP".to_string(),
                    document_type: "principle".to_string(),
                    min_number: 10,
                    max_number: 59,
                },
                FamilyConfig {
                    prefix: "POL".to_string(),
                    document_type: "policy".to_string(),
                    min_number: 500,
                    max_number: 599,
                },
            ],
            keywords: KeywordConfig::default(),
            retrieval: RetrievalConfig::default(),
            gate: GateConfig::default(),
            context: ContextConfig::default(),
            features: FeatureFlags::default(),
        }
    }
}
