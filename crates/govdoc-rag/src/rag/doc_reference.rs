//! Document reference extraction and resolution.
//!
//! Recognizes prefixed references ("ADR.12", "adr-0012", "PCP 22"), bare
//! numbers checked against each family's reserved range, explicit ranges
//! ("ADR 10 to 15") and enumerations ("ADR.12, 14 and 30"). Two or more
//! references of the same family widen to the inclusive span between the
//! lowest and highest number; that span is never narrowed again, so asking
//! about two far-apart documents pulls in everything between them.

use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use crate::config::{EngineConfig, Family};
use crate::error::ConfigError;
use crate::rag::patterns::SubjectMatcher;
use crate::types::{canonical_id, DocReference, DocumentType, ReferenceRange};

static BARE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,4}\b").expect("bare number regex is valid")
});

/// Separator allowed between a family code and its number.
const SEPARATOR: &str = r"(?:\s*[.\-_:#]\s*|\s+)?";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceExtraction {
    /// References in order of appearance, deduplicated.
    pub references: Vec<DocReference>,
    /// At most one range per family.
    pub ranges: Vec<ReferenceRange>,
}

impl ReferenceExtraction {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn resolved(&self) -> impl Iterator<Item = &DocReference> {
        self.references.iter().filter(|r| r.is_resolved())
    }

    pub fn resolved_ids(&self) -> Vec<String> {
        self.resolved()
            .filter_map(|r| r.canonical_id.clone())
            .collect()
    }

    pub fn ambiguous(&self) -> impl Iterator<Item = &DocReference> {
        self.references.iter().filter(|r| r.is_ambiguous)
    }

    pub fn has_ambiguous(&self) -> bool {
        self.references.iter().any(|r| r.is_ambiguous)
    }

    pub fn has_resolved(&self) -> bool {
        self.references.iter().any(|r| r.is_resolved())
    }

    pub fn range_for(&self, prefix: &str) -> Option<&ReferenceRange> {
        self.ranges.iter().find(|r| r.prefix == prefix)
    }

    /// Recompute family ranges after references changed. Existing ranges are
    /// kept as lower bounds, so a range can only widen.
    pub fn refresh_ranges(&mut self) {
        self.ranges = expand_ranges(&self.references, &self.ranges);
    }
}

struct FamilyPatterns {
    range: Regex,
    list: Regex,
    list_item: Regex,
    prefixed: Regex,
}

pub struct DocReferenceResolver {
    families: Vec<Family>,
    subjects: SubjectMatcher,
    patterns: Option<FamilyPatterns>,
}

impl DocReferenceResolver {
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        let families = config.families()?;
        let subjects = SubjectMatcher::new(&config.keywords.subject_aliases)?;
        let patterns = if families.is_empty() {
            None
        } else {
            Some(build_patterns(&families)?)
        };

        Ok(Self {
            families,
            subjects,
            patterns,
        })
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn family(&self, prefix: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.prefix == prefix)
    }

    /// Extract every reference in `text`. Never fails; unrecognized input
    /// yields an empty extraction.
    pub fn extract(&self, text: &str) -> ReferenceExtraction {
        let Some(patterns) = &self.patterns else {
            return ReferenceExtraction::default();
        };

        let mut found: Vec<(usize, DocReference)> = Vec::new();
        let mut masks: Vec<Range<usize>> = Vec::new();
        let mut explicit_ranges: Vec<ReferenceRange> = Vec::new();

        for caps in patterns.range.captures_iter(text) {
            let (Some(whole), Some(p1), Some(n1), Some(n2)) =
                (caps.get(0), caps.name("p1"), caps.name("n1"), caps.name("n2"))
            else {
                continue;
            };
            let prefix = p1.as_str().to_uppercase();
            if caps
                .name("p2")
                .is_some_and(|p2| p2.as_str().to_uppercase() != prefix)
            {
                continue;
            }
            let (Ok(first), Ok(second)) = (n1.as_str().parse::<u32>(), n2.as_str().parse::<u32>())
            else {
                continue;
            };

            found.push((
                whole.start(),
                DocReference::resolved(&text[whole.start()..n1.end()], &prefix, first),
            ));
            found.push((
                n2.start(),
                DocReference::resolved(&text[n2.start()..n2.end()], &prefix, second),
            ));
            explicit_ranges.push(ReferenceRange {
                prefix,
                start: first.min(second),
                end: first.max(second),
            });
            masks.push(whole.range());
        }

        for caps in patterns.list.captures_iter(text) {
            let (Some(whole), Some(p), Some(first), Some(rest)) =
                (caps.get(0), caps.name("p"), caps.name("first"), caps.name("rest"))
            else {
                continue;
            };
            if overlaps(&masks, &whole.range()) {
                continue;
            }
            let prefix = p.as_str().to_uppercase();
            if let Ok(number) = first.as_str().parse::<u32>() {
                found.push((
                    whole.start(),
                    DocReference::resolved(&text[whole.start()..first.end()], &prefix, number),
                ));
            }
            for item in patterns.list_item.captures_iter(rest.as_str()) {
                let Some(n) = item.name("n") else { continue };
                let Ok(number) = n.as_str().parse::<u32>() else {
                    continue;
                };
                let item_prefix = item
                    .name("p")
                    .map(|p| p.as_str().to_uppercase())
                    .unwrap_or_else(|| prefix.clone());
                let offset = rest.start() + item.get(0).map(|m| m.start()).unwrap_or(0);
                let raw = item.get(0).map(|m| m.as_str().trim()).unwrap_or_default();
                found.push((offset, DocReference::resolved(raw, &item_prefix, number)));
            }
            masks.push(whole.range());
        }

        for caps in patterns.prefixed.captures_iter(text) {
            let (Some(whole), Some(p), Some(n)) = (caps.get(0), caps.name("p"), caps.name("n"))
            else {
                continue;
            };
            if overlaps(&masks, &whole.range()) {
                continue;
            }
            let Ok(number) = n.as_str().parse::<u32>() else {
                continue;
            };
            found.push((
                whole.start(),
                DocReference::resolved(whole.as_str(), &p.as_str().to_uppercase(), number),
            ));
            masks.push(whole.range());
        }

        for m in BARE_NUMBER_RE.find_iter(text) {
            if overlaps(&masks, &m.range())
                || !is_standalone_number(text, m.start(), m.end())
                || is_quantity(text, m.start(), m.end())
            {
                continue;
            }
            let Ok(number) = m.as_str().parse::<u32>() else {
                continue;
            };
            if let Some(reference) = self.resolve_bare(text, m.as_str(), number) {
                found.push((m.start(), reference));
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut references: Vec<DocReference> = Vec::with_capacity(found.len());
        for (_, reference) in found {
            let duplicate = references.iter().any(|r| {
                r.canonical_id == reference.canonical_id && r.candidates == reference.candidates
            });
            if !duplicate {
                references.push(reference);
            }
        }

        let ranges = expand_ranges(&references, &explicit_ranges);
        ReferenceExtraction { references, ranges }
    }

    /// Resolve a number without family code against the configured ranges.
    /// Family words in the query restrict the candidates, so "the top 5
    /// principles" never becomes a decision record.
    fn resolve_bare(&self, text: &str, raw: &str, number: u32) -> Option<DocReference> {
        let mut matching: Vec<&Family> = self.families.iter().filter(|f| f.contains(number)).collect();
        let named: Vec<DocumentType> = self
            .subjects
            .subjects_in(text)
            .into_iter()
            .filter(|t| self.families.iter().any(|f| f.document_type == *t))
            .collect();
        if !named.is_empty() {
            matching.retain(|f| named.contains(&f.document_type));
        }

        match matching.as_slice() {
            [] => None,
            [family] => Some(DocReference::resolved(raw, &family.prefix, number)),
            _ => {
                let candidates = matching
                    .iter()
                    .map(|f| canonical_id(&f.prefix, number))
                    .collect();
                Some(DocReference::ambiguous(raw, number, candidates))
            }
        }
    }

    /// Settle an ambiguous reference using families seen earlier in the
    /// conversation. Returns `None` unless exactly one candidate family is
    /// preferred.
    pub fn disambiguate(&self, reference: &DocReference, preferred_prefixes: &[String]) -> Option<DocReference> {
        if !reference.is_ambiguous {
            return None;
        }
        let number = reference.number()?;
        let chosen: Vec<&String> = reference
            .candidates
            .iter()
            .filter(|candidate| {
                preferred_prefixes
                    .iter()
                    .any(|p| candidate.starts_with(&format!("{}.", p)))
            })
            .collect();
        match chosen.as_slice() {
            [candidate] => {
                let prefix = candidate.split('.').next()?;
                Some(DocReference::resolved(reference.raw_text.clone(), prefix, number))
            }
            _ => None,
        }
    }
}

fn build_patterns(families: &[Family]) -> Result<FamilyPatterns, regex::Error> {
    let prefixes = families
        .iter()
        .map(|f| regex::escape(&f.prefix))
        .collect::<Vec<_>>()
        .join("|");
    let connector = r"(?:-|–|\btot en met\b|\bthrough\b|\bthru\b|\buntil\b|\btill\b|\bto\b|\bt/m\b|\btot\b)";

    let range = Regex::new(&format!(
        r"(?i)\b(?P<p1>{prefixes})s?{SEPARATOR}(?P<n1>\d{{1,4}})\s*{connector}\s*(?:(?P<p2>{prefixes})s?{SEPARATOR})?(?P<n2>\d{{1,4}})\b"
    ))?;
    let list = Regex::new(&format!(
        r"(?i)\b(?P<p>{prefixes})s?{SEPARATOR}(?P<first>\d{{1,4}})\b(?P<rest>(?:\s*(?:,|&|\band\b|\ben\b|\bor\b)\s*(?:(?:{prefixes})s?{SEPARATOR})?\d{{1,4}}\b)+)"
    ))?;
    let list_item = Regex::new(&format!(
        r"(?i)(?:\b(?P<p>{prefixes})s?{SEPARATOR})?(?P<n>\b\d{{1,4}})\b"
    ))?;
    let prefixed = Regex::new(&format!(
        r"(?i)\b(?P<p>{prefixes})s?{SEPARATOR}(?P<n>\d{{1,4}})\b"
    ))?;

    Ok(FamilyPatterns {
        range,
        list,
        list_item,
        prefixed,
    })
}

fn overlaps(masks: &[Range<usize>], range: &Range<usize>) -> bool {
    masks
        .iter()
        .any(|m| m.start < range.end && range.start < m.end)
}

/// Rejects digits that belong to decimals ("2.5"), percentages, or
/// hyphenated names ("COVID-19").
fn is_standalone_number(text: &str, start: usize, end: usize) -> bool {
    let mut before = text[..start].chars().rev();
    let (prev, prev2) = (before.next(), before.next());
    if matches!(prev, Some('.') | Some(',')) && prev2.is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    if prev == Some('-') && prev2.is_some_and(|c| c.is_alphabetic()) {
        return false;
    }

    let mut after = text[end..].chars();
    let (next, next2) = (after.next(), after.next());
    if matches!(next, Some('.') | Some(',')) && next2.is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    next != Some('%')
}

/// Words around a number that make it a quantity ("top 5", "3 most",
/// "last 12 months") rather than a document number.
const QUANTITY_BEFORE: &[&str] = &[
    "top", "first", "last", "past", "next", "latest", "previous", "recent",
    "eerste", "laatste", "afgelopen", "komende", "vorige",
];
const QUANTITY_AFTER: &[&str] = &[
    "most", "best", "main", "key", "day", "days", "week", "weeks", "month", "months",
    "year", "years", "times", "items", "dagen", "weken", "maanden", "jaar", "jaren",
    "keer", "belangrijkste", "meest",
];

fn is_quantity(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start]
        .split(|c: char| !c.is_alphanumeric())
        .rev()
        .find(|w| !w.is_empty())
        .map(str::to_lowercase);
    let after = text[end..]
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .map(str::to_lowercase);
    before.is_some_and(|w| QUANTITY_BEFORE.contains(&w.as_str()))
        || after.is_some_and(|w| QUANTITY_AFTER.contains(&w.as_str()))
}

/// One inclusive range per family holding two or more distinct numbers or an
/// explicit range.
fn expand_ranges(references: &[DocReference], explicit: &[ReferenceRange]) -> Vec<ReferenceRange> {
    let mut numbers: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for reference in references.iter().filter(|r| r.is_resolved()) {
        if let Some(number) = reference.number() {
            let entry = numbers.entry(reference.prefix.as_str()).or_default();
            if !entry.contains(&number) {
                entry.push(number);
            }
        }
    }
    for range in explicit {
        let entry = numbers.entry(range.prefix.as_str()).or_default();
        for number in [range.start, range.end] {
            if !entry.contains(&number) {
                entry.push(number);
            }
        }
    }

    numbers
        .into_iter()
        .filter(|(prefix, nums)| nums.len() >= 2 || explicit.iter().any(|r| r.prefix == *prefix))
        .filter_map(|(prefix, nums)| {
            let start = *nums.iter().min()?;
            let end = *nums.iter().max()?;
            Some(ReferenceRange {
                prefix: prefix.to_string(),
                start,
                end,
            })
        })
        .collect()
}
