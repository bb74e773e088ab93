//! Compiled phrase tables shared by the resolver and the intent classifier.

use regex::Regex;

use crate::config::SubjectAliases;
use crate::types::DocumentType;

/// A case-insensitive, word-bounded alternation of literal phrases.
#[derive(Debug, Clone)]
pub struct PhraseSet {
    regex: Option<Regex>,
}

impl PhraseSet {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, regex::Error> {
        let mut phrases: Vec<String> = phrases
            .iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if phrases.is_empty() {
            return Ok(Self { regex: None });
        }
        // Longest first so "decision records" wins over "decision".
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        phrases.dedup();

        let alternation = phrases
            .iter()
            .map(|p| {
                p.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(text))
    }

    /// Byte offset of the first match.
    pub fn first_position(&self, text: &str) -> Option<usize> {
        self.regex.as_ref()?.find(text).map(|m| m.start())
    }

    /// Matched phrases, lowercased, in order of appearance and deduplicated.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        let Some(regex) = &self.regex else {
            return Vec::new();
        };
        let mut found: Vec<String> = Vec::new();
        for m in regex.find_iter(text) {
            let phrase = m.as_str().to_lowercase();
            if !found.contains(&phrase) {
                found.push(phrase);
            }
        }
        found
    }
}

/// Maps words such as "principles" or "ADRs" to document types.
#[derive(Debug, Clone)]
pub struct SubjectMatcher {
    sets: Vec<(DocumentType, PhraseSet)>,
}

impl SubjectMatcher {
    pub fn new(aliases: &[SubjectAliases]) -> Result<Self, regex::Error> {
        let sets = aliases
            .iter()
            .map(|a| Ok((a.document_type, PhraseSet::new(&a.terms)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { sets })
    }

    /// Document types mentioned in the text, ordered by first mention.
    pub fn subjects_in(&self, text: &str) -> Vec<DocumentType> {
        let mut found: Vec<(usize, DocumentType)> = self
            .sets
            .iter()
            .filter_map(|(doc_type, set)| set.first_position(text).map(|pos| (pos, *doc_type)))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        let mut subjects = Vec::with_capacity(found.len());
        for (_, doc_type) in found {
            if !subjects.contains(&doc_type) {
                subjects.push(doc_type);
            }
        }
        subjects
    }

    pub fn first_subject(&self, text: &str) -> Option<DocumentType> {
        self.subjects_in(text).into_iter().next()
    }

    pub fn mentions(&self, text: &str, doc_type: DocumentType) -> bool {
        self.sets
            .iter()
            .any(|(t, set)| *t == doc_type && set.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordConfig;

    #[test]
    fn test_phrase_set_respects_word_boundaries() {
        let set = PhraseSet::new(&["list", "show all"]).unwrap();
        assert!(set.is_match("please LIST the principles"));
        assert!(set.is_match("show   all ADRs"));
        assert!(!set.is_match("a checklist of things"));
        assert_eq!(set.find_all("list and list, show all"), vec!["list", "show all"]);
    }

    #[test]
    fn test_empty_phrase_set_never_matches() {
        let set = PhraseSet::new::<&str>(&[]).unwrap();
        assert!(!set.is_match("anything"));
        assert!(set.find_all("anything").is_empty());
    }

    #[test]
    fn test_subjects_are_ordered_by_mention() {
        let matcher = SubjectMatcher::new(&KeywordConfig::default().subject_aliases).unwrap();
        assert_eq!(
            matcher.subjects_in("which principles relate to adr 12"),
            vec![DocumentType::Principle, DocumentType::DecisionRecord]
        );
        assert_eq!(matcher.first_subject("what does 22 decide"), None);
        assert!(matcher.mentions("list all ADRs", DocumentType::DecisionRecord));
    }
}
