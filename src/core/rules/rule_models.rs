// Rule domain models.
//
// There are two views of the rules:
// - `RuleDocument` is the declarative document exactly as it is stored
//   (categories of stop words, forbidden word pairs, spam regexes).
// - `RuleBook` is the compiled, immutable snapshot the filter works against.
//   A reload builds a brand new RuleBook and swaps it in whole.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::rule_set::RuleError;

/// How serious a rule hit is considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(RuleError::InvalidRule(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// DECLARATIVE DOCUMENT
// ============================================================================

/// One stop-word category as written in the rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopWordCategory {
    pub words: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

/// A pair of words that is forbidden when both appear in one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCombination {
    pub words: [String; 2],
    pub category: String,
    #[serde(default)]
    pub severity: Severity,
}

impl WordCombination {
    pub fn new(
        word_a: impl Into<String>,
        word_b: impl Into<String>,
        category: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            words: [word_a.into(), word_b.into()],
            category: category.into(),
            severity,
        }
    }

    pub fn word_a(&self) -> &str {
        &self.words[0]
    }

    pub fn word_b(&self) -> &str {
        &self.words[1]
    }
}

/// A spam regex as written in the rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamPatternDef {
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

/// The whole rule document. Every section is optional on disk.
///
/// Categories are keyed by name, so names are unique by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub stop_words: BTreeMap<String, StopWordCategory>,
    #[serde(default)]
    pub word_combinations: Vec<WordCombination>,
    #[serde(default)]
    pub spam_patterns: Vec<SpamPatternDef>,
}

// ============================================================================
// COMPILED SNAPSHOT
// ============================================================================

/// Words shorter than this (in characters) never match a stop word.
pub const MIN_MATCHED_WORD_CHARS: usize = 4;

#[derive(Debug, Clone)]
struct CompiledCategory {
    name: String,
    words: Vec<String>,
}

/// A compiled spam pattern.
#[derive(Debug, Clone)]
pub struct SpamPattern {
    pub regex: Regex,
    pub description: String,
}

/// Immutable, ready-to-query rule snapshot.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    categories: Vec<CompiledCategory>,
    combinations: Vec<WordCombination>,
    spam_patterns: Vec<SpamPattern>,
}

impl RuleBook {
    /// An empty rule book. Nothing ever matches.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a document. Fails if any spam pattern is not a valid regex, so a
    /// broken document never produces a half-populated rule book.
    pub fn compile(document: &RuleDocument) -> Result<Self, RuleError> {
        let categories = document
            .stop_words
            .iter()
            .map(|(name, category)| {
                let mut words: Vec<String> = Vec::with_capacity(category.words.len());
                for word in &category.words {
                    let word = word.trim().to_lowercase();
                    // An empty stop word would be contained in every token
                    if !word.is_empty() && !words.contains(&word) {
                        words.push(word);
                    }
                }
                CompiledCategory {
                    name: name.clone(),
                    words,
                }
            })
            .collect();

        let combinations = document
            .word_combinations
            .iter()
            .map(|combo| {
                WordCombination::new(
                    combo.word_a().trim().to_lowercase(),
                    combo.word_b().trim().to_lowercase(),
                    combo.category.clone(),
                    combo.severity,
                )
            })
            .collect();

        let mut spam_patterns = Vec::with_capacity(document.spam_patterns.len());
        for def in &document.spam_patterns {
            let regex = Regex::new(&def.pattern).map_err(|e| RuleError::InvalidPattern {
                pattern: def.pattern.clone(),
                message: e.to_string(),
            })?;
            spam_patterns.push(SpamPattern {
                regex,
                description: def.description.clone(),
            });
        }

        Ok(Self {
            categories,
            combinations,
            spam_patterns,
        })
    }

    /// Look up a single token against every stop-word category.
    ///
    /// Matching is substring containment in both directions (the token contains
    /// a stop word, or a stop word contains the token), and only for tokens of
    /// at least [`MIN_MATCHED_WORD_CHARS`] characters. This is recall-biased on
    /// purpose and will flag innocent words that embed a stop word.
    ///
    /// Returns the name of the first matching category.
    pub fn lookup_word(&self, word: &str) -> Option<&str> {
        let word = word.to_lowercase();
        if word.chars().count() < MIN_MATCHED_WORD_CHARS {
            return None;
        }

        self.categories
            .iter()
            .find(|category| {
                category
                    .words
                    .iter()
                    .any(|stop| word.contains(stop.as_str()) || stop.contains(word.as_str()))
            })
            .map(|category| category.name.as_str())
    }

    /// Find the first configured pair whose two words both occur anywhere in
    /// the message. Order and distance between the words do not matter.
    pub fn lookup_combination(&self, message: &str) -> Option<&WordCombination> {
        let message = message.to_lowercase();
        self.combinations.iter().find(|combo| {
            !combo.word_a().is_empty()
                && !combo.word_b().is_empty()
                && message.contains(combo.word_a())
                && message.contains(combo.word_b())
        })
    }

    /// Spam patterns in declaration order.
    pub fn spam_patterns(&self) -> &[SpamPattern] {
        &self.spam_patterns
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn combination_count(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(|c| c.words.is_empty())
            && self.combinations.is_empty()
            && self.spam_patterns.is_empty()
    }
}
