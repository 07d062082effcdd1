use serde::Deserialize;
use std::fmt;

/// The structured answer we ask a remote classifier to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierVerdict {
    pub is_violation: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What a single classifier invocation produced.
///
/// The gateway maps each variant explicitly:
/// - `Verdict` is a success.
/// - `ParseFailure` means the classifier answered but not in the expected
///   shape. It is treated as "no violation, no reason" and still counts as a
///   success for failure tracking.
/// - `CallFailure` (network error, bad status, timeout) counts toward the
///   failure threshold and triggers failover.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierResponse {
    Verdict(ClassifierVerdict),
    ParseFailure { raw: String },
    CallFailure { error: String },
}

impl ClassifierResponse {
    /// Interpret the text content a classifier replied with.
    pub fn from_content(content: &str) -> Self {
        match serde_json::from_str::<ClassifierVerdict>(content.trim()) {
            Ok(verdict) => ClassifierResponse::Verdict(verdict),
            Err(_) => ClassifierResponse::ParseFailure {
                raw: content.to_string(),
            },
        }
    }

    pub fn call_failure(error: impl fmt::Display) -> Self {
        ClassifierResponse::CallFailure {
            error: error.to_string(),
        }
    }
}

/// Position of a classifier in the failover order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierRole {
    Primary,
    Secondary,
}

impl fmt::Display for ClassifierRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierRole::Primary => write!(f, "primary"),
            ClassifierRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Three-valued result of asking the gateway to corroborate a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Corroboration {
    /// A classifier flagged the message.
    Violation {
        role: ClassifierRole,
        reason: Option<String>,
    },
    /// A classifier answered and did not flag the message.
    Clean { role: ClassifierRole },
    /// No classifier could be reached. Neither a pass nor a violation.
    Inconclusive,
}

/// Snapshot of one classifier's failure tracking, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierHealth {
    pub role: ClassifierRole,
    pub name: String,
    pub consecutive_failures: u32,
    /// True once the classifier is out of rotation
    pub skipped: bool,
}
