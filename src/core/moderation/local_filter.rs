// Local filter - deterministic, synchronous checks against the rule book.
//
// Checks run in a fixed order and the first hit wins:
// 1. forbidden word combinations (explicit intent, highest precedence)
// 2. per-token stop words
// 3. spam regexes, in declaration order
// 4. heuristic triggers (length, caps, repetition)

use super::moderation_models::{HeuristicLimits, LocalHit, Trigger, Verdict};
use crate::core::rules::RuleBook;

pub struct LocalFilter {
    limits: HeuristicLimits,
}

impl LocalFilter {
    pub fn new(limits: HeuristicLimits) -> Self {
        Self { limits }
    }

    /// Evaluate a message and describe the first rule it breaks.
    pub fn evaluate(&self, rules: &RuleBook, message: &str) -> Verdict {
        match self.check(rules, message) {
            Some(hit) => Verdict::local(hit.reason()),
            None => Verdict::clean(),
        }
    }

    /// Find the first local rule that matches, if any.
    pub fn check(&self, rules: &RuleBook, message: &str) -> Option<LocalHit> {
        if let Some(combo) = rules.lookup_combination(message) {
            return Some(LocalHit::Combination(combo.clone()));
        }

        let lowered = message.to_lowercase();
        for word in lowered.split_whitespace() {
            if let Some(category) = rules.lookup_word(word) {
                return Some(LocalHit::StopWord {
                    word: word.to_string(),
                    category: category.to_string(),
                });
            }
        }

        for pattern in rules.spam_patterns() {
            if let Some(found) = pattern.regex.find(message) {
                return Some(LocalHit::SpamPattern {
                    description: pattern.description.clone(),
                    matched: found.as_str().to_string(),
                });
            }
        }

        Trigger::ALL
            .into_iter()
            .find(|trigger| self.fires(*trigger, message))
            .map(LocalHit::Trigger)
    }

    fn fires(&self, trigger: Trigger, message: &str) -> bool {
        match trigger {
            Trigger::LongMessage => message.chars().count() > self.limits.max_message_chars,
            Trigger::ExcessiveCaps => {
                let total = message.chars().count();
                if total == 0 {
                    return false;
                }
                let upper = message.chars().filter(|c| c.is_uppercase()).count();
                upper as f64 / total as f64 > self.limits.caps_ratio_threshold
            }
            Trigger::RepeatedMessage => false,
        }
    }
}

impl Default for LocalFilter {
    fn default() -> Self {
        Self::new(HeuristicLimits::default())
    }
}
