//! Intent Classifier
//!
//! Deterministic, rule-based classification of a normalized query into one
//! `Intent`. Signals are extracted once by compiled phrase tables; each rule
//! is a pure predicate over those signals, evaluated in priority order. The
//! first rule that fires wins and its index is reported for tracing.

use regex::Regex;

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::rag::normalize::tokens;
use crate::rag::patterns::{PhraseSet, SubjectMatcher};
use crate::trace::RuleHit;
use crate::types::{ExtractedSignals, Intent};

const LIST_VERBS: &[&str] = &[
    "list", "list all", "enumerate", "show all", "show me all", "show every",
    "give me all", "give all", "get all", "display all", "overview of all",
    "a list of", "the list of", "all available", "toon alle", "geef alle", "lijst",
    "opsomming", "overzicht van alle",
];

const LIST_QUESTIONS: &[&str] = &[
    r"\bwhich\b.*\b(?:exist|exists|are there|do we have|have we got|are available)\b",
    r"\bwhat\b.*\b(?:do we have|exist|are there|are available)\b",
    r"\bwelke\b.*\b(?:zijn er|bestaan|hebben we|zijn beschikbaar)\b",
];

/// A topical filter attached to a list request turns it into a question.
const QUALIFIER: &str = r"(?i)\b(?:about|regarding|related to|relating to|concerning|on the topic of|that mention|mentioning|with respect to|dealing with|covering|in the area of|applicable to|that apply to|on|for|over|betreffende|met betrekking tot|gerelateerd aan|rondom|rond)\s+(?P<topic>(?:the\s+|de\s+|het\s+)?[\p{L}\d][\p{L}\d\-]*)";

const QUALIFIER_STOP_TOPICS: &[&str] = &["it", "them", "those", "these", "that", "this", "me", "us", "ze", "het", "dat"];

const COUNT_PATTERNS: &[&str] = &[
    "how many", "what is the total number of", "total number of", "number of", "count",
    "count the", "hoeveel", "het aantal", "aantal",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "what's", "whats", "how", "why", "explain", "which", "who", "when", "where",
    "wat", "hoe", "waarom", "welke", "wie", "wanneer", "waar", "leg uit",
];

const CONVERSATIONAL: &[&str] = &[
    "hello", "hi", "hey", "good morning", "good afternoon", "good evening", "thanks",
    "thank you", "cheers", "bye", "goodbye", "ok", "okay", "great", "cool", "nice",
    "who are you", "what are you", "what can you do", "how are you", "are you a bot",
    "you are", "you're", "i think", "i like", "i love", "i hate", "in my opinion",
    "hallo", "goedemorgen", "goedemiddag", "bedankt", "dank je", "dank u", "doei",
];

const FOLLOW_UP: &str = r"(?i)^\s*(?:and\s+|en\s+)?(?:(?:list|show|give me|display|summarize|explain|count|describe|compare|toon|geef)\s+(?:me\s+)?(?:all\s+(?:of\s+)?)?|what about\s+|how about\s+|(?:tell me\s+)?more about\s+|tell me about\s+|how many of\s+|en\s+)?(?:them|those|these|it|that|this|ze|die|deze|dat|het)\s*[?.!]*\s*$";

/// Conversational phrasing is short by definition.
const CONVERSATIONAL_MAX_TOKENS: usize = 8;

/// Outcome of classification: the winning intent, the rule that fired, and
/// the integer score per candidate intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub rule: RuleHit,
    pub scores: Vec<(Intent, i32)>,
}

/// Reference facts the rules need, computed by the resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceSignals {
    pub has_resolved: bool,
    pub has_ambiguous: bool,
    /// Follow-up phrasing with nothing in the conversation to bind to.
    pub unresolved_follow_up: bool,
}

type Rule = fn(&ExtractedSignals, &ReferenceSignals) -> Option<Intent>;

/// Rules in priority order; the position is the traced rule index.
const RULES: &[(u8, &str, Rule)] = &[
    (0, "unresolved_follow_up", rule_unresolved_follow_up),
    (1, "document_reference", rule_document_reference),
    (2, "enumerate_without_qualifier", rule_listing),
    (3, "count_pattern", rule_counting),
    (4, "short_term", rule_terminology),
    (5, "trigger_or_question", rule_semantic),
    (6, "conversational_phrase", rule_conversational),
    (7, "no_domain_cue", rule_off_topic),
    (8, "default", rule_default),
];

pub fn rule_unresolved_follow_up(_: &ExtractedSignals, refs: &ReferenceSignals) -> Option<Intent> {
    refs.unresolved_follow_up.then_some(Intent::ClarificationNeeded)
}

pub fn rule_document_reference(signals: &ExtractedSignals, refs: &ReferenceSignals) -> Option<Intent> {
    if signals.list_verb || !(refs.has_resolved || refs.has_ambiguous) {
        return None;
    }
    if refs.has_ambiguous {
        Some(Intent::ClarificationNeeded)
    } else {
        Some(Intent::ExactLookup)
    }
}

pub fn rule_listing(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    (signals.list_verb && signals.scoping_qualifier.is_none()).then_some(Intent::Listing)
}

pub fn rule_counting(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    signals.count_pattern.then_some(Intent::Counting)
}

pub fn rule_terminology(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    let short = (1..=2).contains(&signals.token_count);
    (short && !signals.question_word && !signals.conversational_phrase && !signals.follow_up_pattern)
        .then_some(Intent::TerminologyLookup)
}

pub fn rule_semantic(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    let asks = signals.question_word && !signals.conversational_phrase;
    (!signals.trigger_terms.is_empty() || asks).then_some(Intent::SemanticAnswer)
}

pub fn rule_conversational(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    signals.conversational_phrase.then_some(Intent::Conversational)
}

pub fn rule_off_topic(signals: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    (!signals.domain_cue).then_some(Intent::OffTopic)
}

pub fn rule_default(_: &ExtractedSignals, _: &ReferenceSignals) -> Option<Intent> {
    Some(Intent::SemanticAnswer)
}

/// A resolved reference always beats the generic fallback classification.
pub fn apply_reference_override(intent: Intent, has_resolved: bool) -> Option<Intent> {
    (has_resolved && intent == Intent::SemanticAnswer).then_some(Intent::ExactLookup)
}

pub struct IntentClassifier {
    list_verbs: PhraseSet,
    list_questions: Vec<Regex>,
    qualifier: Regex,
    count_patterns: PhraseSet,
    question_words: PhraseSet,
    conversational: PhraseSet,
    follow_up: Regex,
    triggers: PhraseSet,
    domain_terms: PhraseSet,
    approval: PhraseSet,
    subjects: SubjectMatcher,
}

impl IntentClassifier {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let keywords = &config.keywords;
        let list_questions = LIST_QUESTIONS
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            list_verbs: PhraseSet::new(LIST_VERBS)?,
            list_questions,
            qualifier: Regex::new(QUALIFIER)?,
            count_patterns: PhraseSet::new(COUNT_PATTERNS)?,
            question_words: PhraseSet::new(QUESTION_WORDS)?,
            conversational: PhraseSet::new(CONVERSATIONAL)?,
            follow_up: Regex::new(FOLLOW_UP)?,
            triggers: PhraseSet::new(&keywords.semantic_triggers)?,
            domain_terms: PhraseSet::new(&keywords.domain_terms)?,
            approval: PhraseSet::new(&keywords.approval_keywords)?,
            subjects: SubjectMatcher::new(&keywords.subject_aliases)?,
        })
    }

    pub fn subjects(&self) -> &SubjectMatcher {
        &self.subjects
    }

    pub fn is_follow_up(&self, text: &str) -> bool {
        self.follow_up.is_match(text)
    }

    /// Extract every pattern signal from the normalized text.
    pub fn signals(&self, text: &str, has_references: bool) -> ExtractedSignals {
        let token_count = tokens(text).count();
        let count_pattern = self.count_patterns.is_match(text);
        // "what number of X are there" is a count, not a listing.
        let list_verb = self.list_verbs.is_match(text)
            || (!count_pattern && self.list_questions.iter().any(|r| r.is_match(text)));
        let scoping_qualifier = if list_verb { self.scoping_qualifier(text) } else { None };
        let trigger_terms = self.triggers.find_all(text);
        let subject = self.subjects.first_subject(text);
        let domain_cue = has_references
            || subject.is_some()
            || !trigger_terms.is_empty()
            || self.domain_terms.is_match(text);
        let conversational_phrase = !domain_cue
            && token_count <= CONVERSATIONAL_MAX_TOKENS
            && self.conversational.is_match(text);

        ExtractedSignals {
            token_count,
            list_verb,
            scoping_qualifier,
            count_pattern,
            question_word: self.question_words.is_match(text),
            trigger_terms,
            subject,
            approval_keyword: self.approval.is_match(text),
            follow_up_pattern: self.follow_up.is_match(text),
            conversational_phrase,
            domain_cue,
        }
    }

    /// First qualifier phrase whose topic is a real word, not a pronoun.
    fn scoping_qualifier(&self, text: &str) -> Option<String> {
        self.qualifier.captures_iter(text).find_map(|caps| {
            let topic = caps.name("topic")?.as_str().to_lowercase();
            let head = topic
                .trim_start_matches("the ")
                .trim_start_matches("de ")
                .trim_start_matches("het ")
                .trim();
            if head.is_empty() || QUALIFIER_STOP_TOPICS.contains(&head) {
                return None;
            }
            caps.get(0).map(|m| m.as_str().to_lowercase())
        })
    }

    /// Evaluate the rules in priority order.
    pub fn classify(&self, signals: &ExtractedSignals, refs: &ReferenceSignals) -> Classification {
        let mut scores: Vec<(Intent, i32)> = Vec::new();
        let mut winner: Option<(Intent, RuleHit)> = None;

        for (index, name, rule) in RULES {
            let Some(intent) = rule(signals, refs) else {
                continue;
            };
            let score = 100 - 10 * i32::from(*index);
            match scores.iter_mut().find(|(i, _)| *i == intent) {
                Some(entry) => entry.1 = entry.1.max(score),
                None => scores.push((intent, score)),
            }
            if winner.is_none() {
                winner = Some((
                    intent,
                    RuleHit {
                        index: *index,
                        name: (*name).to_string(),
                    },
                ));
            }
        }

        let (intent, rule) = winner.unwrap_or((
            Intent::SemanticAnswer,
            RuleHit {
                index: 8,
                name: "default".to_string(),
            },
        ));
        scores.sort_by(|a, b| b.1.cmp(&a.1));

        Classification { intent, rule, scores }
    }
}
