//! Query normalization: whitespace collapsing, language detection and
//! abbreviation expansion.

use std::collections::BTreeMap;

use crate::types::Language;

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "is", "are", "what", "which", "how", "why", "does", "do", "of", "and", "about",
    "for", "with", "all", "show", "list", "many", "there", "this", "that", "we", "have",
    "to", "in", "a", "an", "it", "them", "those", "me",
];

const DUTCH_STOPWORDS: &[&str] = &[
    "de", "het", "een", "is", "zijn", "wat", "welke", "hoe", "waarom", "van", "en", "over",
    "voor", "met", "alle", "toon", "lijst", "hoeveel", "er", "dit", "dat", "wij", "we",
    "hebben", "naar", "in", "ze", "die", "deze", "mij", "geef",
];

/// Query after normalization. Classification runs on `text`; retrieval uses
/// `search_text`, which carries abbreviation expansions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub raw: String,
    pub text: String,
    pub lower: String,
    pub search_text: String,
    pub language: Language,
}

pub struct Normalizer {
    abbreviations: BTreeMap<String, String>,
}

impl Normalizer {
    pub fn new(abbreviations: &BTreeMap<String, String>) -> Self {
        Self {
            abbreviations: abbreviations
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }

    pub fn normalize(&self, raw: &str) -> NormalizedQuery {
        let text = collapse_whitespace(raw);
        let lower = text.to_lowercase();
        let language = detect_language(&lower);
        let search_text = self.expand_abbreviations(&text);

        NormalizedQuery {
            raw: raw.to_string(),
            text,
            lower,
            search_text,
            language,
        }
    }

    /// Append the expansion of each known abbreviation once, keeping the
    /// original wording intact for lexical matching.
    pub fn expand_abbreviations(&self, text: &str) -> String {
        let mut expansions: Vec<&str> = Vec::new();
        for token in tokens(text) {
            let key = token.to_lowercase();
            let key = key.trim_end_matches('s');
            let expansion = self
                .abbreviations
                .get(key)
                .or_else(|| self.abbreviations.get(&token.to_lowercase()));
            if let Some(expansion) = expansion {
                if !expansions.contains(&expansion.as_str()) {
                    expansions.push(expansion);
                }
            }
        }

        if expansions.is_empty() {
            text.to_string()
        } else {
            format!("{} {}", text, expansions.join(" "))
        }
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Alphanumeric word tokens; separators and punctuation are dropped.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '\''))
        .filter(|t| !t.is_empty())
}

/// Stopword vote between English and Dutch. Requires two hits and a 2:1
/// margin; anything less falls back to `Both`.
pub fn detect_language(lower: &str) -> Language {
    let mut english = 0usize;
    let mut dutch = 0usize;
    for token in tokens(lower) {
        if ENGLISH_STOPWORDS.contains(&token) {
            english += 1;
        }
        if DUTCH_STOPWORDS.contains(&token) {
            dutch += 1;
        }
    }

    if english >= 2 && english >= dutch * 2 {
        Language::Primary
    } else if dutch >= 2 && dutch >= english * 2 {
        Language::Secondary
    } else {
        Language::Both
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordConfig;

    fn normalizer() -> Normalizer {
        Normalizer::new(&KeywordConfig::default().abbreviations)
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let q = normalizer().normalize("  What   is\tADR.12 \n about? ");
        assert_eq!(q.text, "What is ADR.12 about?");
        assert_eq!(q.lower, "what is adr.12 about?");
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("what are the principles about data"), Language::Primary);
        assert_eq!(detect_language("welke principes zijn er over de data"), Language::Secondary);
        // "in" and "is" are shared; a single word never decides.
        assert_eq!(detect_language("adr.0012"), Language::Both);
        assert_eq!(detect_language(""), Language::Both);
    }

    #[test]
    fn test_abbreviations_are_appended_once() {
        let expanded = normalizer().expand_abbreviations("Which ADRs mention the API? ADR list");
        assert_eq!(
            expanded,
            "Which ADRs mention the API? ADR list architecture decision record application programming interface"
        );
        assert_eq!(normalizer().expand_abbreviations("interoperability"), "interoperability");
    }

    #[test]
    fn test_tokens_strip_punctuation() {
        let t: Vec<&str> = tokens("list them, please!").collect();
        assert_eq!(t, vec!["list", "them", "please"]);
    }
}
