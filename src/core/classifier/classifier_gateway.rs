// Classifier gateway - ordered failover across remote text classifiers.
//
// The primary is asked first. Any well-formed answer from it is final, even
// "no violation": the secondary is a failover, not a second opinion. Each
// classifier keeps a consecutive-failure counter; once it reaches the
// threshold the classifier is skipped until a success resets it. Nothing
// resets the counter on a timer (use `reset_failures` to force re-entry).

use super::classifier_models::{
    ClassifierHealth, ClassifierResponse, ClassifierRole, Corroboration,
};
use crate::core::text::truncate_for_log;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Skip a classifier after this many consecutive failures.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// How long a single classifier call may take before it counts as failed.
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(12);

// ============================================================================
// CLASSIFIER TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Short identifier for logs (usually the model name).
    fn name(&self) -> &str;

    /// Classify one message. Never returns an error: failures are values.
    async fn classify(&self, message: &str) -> ClassifierResponse;
}

// ============================================================================
// GATEWAY
// ============================================================================

struct ClassifierSlot {
    role: ClassifierRole,
    classifier: Box<dyn TextClassifier>,
    consecutive_failures: AtomicU32,
}

pub struct ClassifierGateway {
    slots: Vec<ClassifierSlot>,
    max_failures: u32,
    timeout: Duration,
}

impl ClassifierGateway {
    pub fn new(max_failures: u32, timeout: Duration) -> Self {
        Self {
            slots: Vec::with_capacity(2),
            max_failures,
            timeout,
        }
    }

    /// A gateway with no classifiers. Every corroboration is inconclusive.
    pub fn disabled() -> Self {
        Self::new(DEFAULT_MAX_FAILURES, DEFAULT_CLASSIFIER_TIMEOUT)
    }

    pub fn with_primary(self, classifier: Box<dyn TextClassifier>) -> Self {
        self.with_slot(ClassifierRole::Primary, classifier)
    }

    pub fn with_secondary(self, classifier: Box<dyn TextClassifier>) -> Self {
        self.with_slot(ClassifierRole::Secondary, classifier)
    }

    fn with_slot(mut self, role: ClassifierRole, classifier: Box<dyn TextClassifier>) -> Self {
        self.slots.retain(|slot| slot.role != role);
        self.slots.push(ClassifierSlot {
            role,
            classifier,
            consecutive_failures: AtomicU32::new(0),
        });
        // Primary always goes first
        self.slots.sort_by_key(|slot| match slot.role {
            ClassifierRole::Primary => 0,
            ClassifierRole::Secondary => 1,
        });
        self
    }

    /// Ask the classifiers, in failover order, whether `message` violates
    /// policy.
    pub async fn classify(&self, message: &str) -> Corroboration {
        for slot in &self.slots {
            let failures = slot.consecutive_failures.load(Ordering::SeqCst);
            if failures >= self.max_failures {
                tracing::debug!(
                    classifier = slot.classifier.name(),
                    role = %slot.role,
                    failures,
                    "Skipping classifier, failure threshold reached"
                );
                continue;
            }

            tracing::info!(
                classifier = slot.classifier.name(),
                role = %slot.role,
                message = truncate_for_log(message),
                "Sending message for classification"
            );

            let response =
                match tokio::time::timeout(self.timeout, slot.classifier.classify(message)).await
                {
                    Ok(response) => response,
                    Err(_) => ClassifierResponse::call_failure(format!(
                        "timed out after {:?}",
                        self.timeout
                    )),
                };

            match response {
                ClassifierResponse::Verdict(verdict) => {
                    slot.consecutive_failures.store(0, Ordering::SeqCst);
                    tracing::info!(
                        classifier = slot.classifier.name(),
                        is_violation = verdict.is_violation,
                        reason = verdict.reason.as_deref().unwrap_or(""),
                        "Classifier answered"
                    );
                    return if verdict.is_violation {
                        Corroboration::Violation {
                            role: slot.role,
                            reason: verdict.reason,
                        }
                    } else {
                        Corroboration::Clean { role: slot.role }
                    };
                }
                ClassifierResponse::ParseFailure { raw } => {
                    slot.consecutive_failures.store(0, Ordering::SeqCst);
                    tracing::warn!(
                        classifier = slot.classifier.name(),
                        raw = truncate_for_log(&raw),
                        "Classifier reply was not a verdict, treating as no violation"
                    );
                    return Corroboration::Clean { role: slot.role };
                }
                ClassifierResponse::CallFailure { error } => {
                    let failures = slot.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        classifier = slot.classifier.name(),
                        role = %slot.role,
                        failures,
                        error = %error,
                        message = truncate_for_log(message),
                        "Classifier call failed"
                    );
                }
            }
        }

        tracing::error!(
            message = truncate_for_log(message),
            "No moderation classifier available"
        );
        Corroboration::Inconclusive
    }

    /// Current failure tracking for every configured classifier.
    pub fn health(&self) -> Vec<ClassifierHealth> {
        self.slots
            .iter()
            .map(|slot| {
                let failures = slot.consecutive_failures.load(Ordering::SeqCst);
                ClassifierHealth {
                    role: slot.role,
                    name: slot.classifier.name().to_string(),
                    consecutive_failures: failures,
                    skipped: failures >= self.max_failures,
                }
            })
            .collect()
    }

    /// Put every classifier back into rotation.
    pub fn reset_failures(&self) {
        for slot in &self.slots {
            slot.consecutive_failures.store(0, Ordering::SeqCst);
        }
        tracing::info!("Classifier failure counters reset");
    }

    pub fn is_enabled(&self) -> bool {
        !self.slots.is_empty()
    }
}
