// Moderation domain models - data structures for the decision pipeline.
//
// These are pure domain types with no transport dependencies.
// The front-end decides how a verdict is presented to the user.

use crate::core::rules::WordCombination;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which part of the pipeline produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource {
    /// Deterministic local rules only
    Local,
    /// Local rules, corroborated by a classifier
    Combined,
}

impl fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictSource::Local => write!(f, "local"),
            VerdictSource::Combined => write!(f, "combined"),
        }
    }
}

/// Outcome of one moderation check.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub is_violation: bool,
    /// Names the rule that fired, for auditing. `None` for clean messages.
    pub reason: Option<String>,
    pub source: VerdictSource,
}

impl Verdict {
    /// A "no violation" verdict.
    pub fn clean() -> Self {
        Self {
            is_violation: false,
            reason: None,
            source: VerdictSource::Local,
        }
    }

    /// A violation found by the local rules.
    pub fn local(reason: String) -> Self {
        Self {
            is_violation: true,
            reason: Some(reason),
            source: VerdictSource::Local,
        }
    }

    /// Reason text, or an empty string for clean verdicts.
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// Heuristic triggers, checked in this order after the rule-based checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Message is longer than the configured limit
    LongMessage,
    /// More than the configured share of characters are uppercase
    ExcessiveCaps,
    /// Repeated message detection. Not implemented yet, never fires.
    RepeatedMessage,
}

impl Trigger {
    pub const ALL: [Trigger; 3] = [
        Trigger::LongMessage,
        Trigger::ExcessiveCaps,
        Trigger::RepeatedMessage,
    ];
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::LongMessage => write!(f, "long message"),
            Trigger::ExcessiveCaps => write!(f, "excessive caps"),
            Trigger::RepeatedMessage => write!(f, "repeated message"),
        }
    }
}

/// The first local rule that matched a message.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalHit {
    Combination(WordCombination),
    StopWord { word: String, category: String },
    SpamPattern { description: String, matched: String },
    Trigger(Trigger),
}

impl LocalHit {
    /// Human-readable reason naming the rule that fired.
    pub fn reason(&self) -> String {
        match self {
            LocalHit::Combination(combo) => format!(
                "Forbidden word combination: '{}' + '{}' (category: {}, severity: {})",
                combo.word_a(),
                combo.word_b(),
                combo.category,
                combo.severity
            ),
            LocalHit::StopWord { word, category } => {
                format!("Forbidden word: '{}' (category: {})", word, category)
            }
            LocalHit::SpamPattern {
                description,
                matched,
            } => format!("Spam pattern: {} - matched: {}", description, matched),
            LocalHit::Trigger(trigger) => format!("Moderation trigger: {}", trigger),
        }
    }
}

/// Thresholds for the heuristic triggers.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicLimits {
    /// Messages with more characters than this fire `LongMessage`
    pub max_message_chars: usize,
    /// Uppercase share above this fires `ExcessiveCaps`
    pub caps_ratio_threshold: f64,
}

impl Default for HeuristicLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 500,
            caps_ratio_threshold: 0.5,
        }
    }
}
