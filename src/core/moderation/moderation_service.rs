// Moderation engine - core business logic for deciding whether a message
// violates content policy.
//
// This service handles:
// - Local rule evaluation (always, and first)
// - Classifier corroboration (only for locally flagged messages)
// - Merging both reasons into one audit string
//
// Privileged senders are not handled here; the caller skips moderation for
// them before the engine is ever invoked.

use super::local_filter::LocalFilter;
use super::moderation_models::{Verdict, VerdictSource};
use crate::core::classifier::{ClassifierGateway, Corroboration};
use crate::core::rules::{RuleSet, RuleStore};
use crate::core::text::truncate_for_log;
use std::sync::Arc;

pub struct ModerationEngine<S: RuleStore> {
    rules: Arc<RuleSet<S>>,
    filter: LocalFilter,
}

impl<S: RuleStore> ModerationEngine<S> {
    pub fn new(rules: Arc<RuleSet<S>>, filter: LocalFilter) -> Self {
        Self { rules, filter }
    }

    pub fn rules(&self) -> &Arc<RuleSet<S>> {
        &self.rules
    }

    /// Moderate a message.
    ///
    /// Clean messages pass without any classifier call. For locally flagged
    /// messages the gateway is asked to corroborate; its answer can only add
    /// to the reason, never overturn the local finding.
    pub async fn moderate(&self, message: &str, gateway: &ClassifierGateway) -> Verdict {
        let rules = self.rules.snapshot();
        let local = self.filter.evaluate(&rules, message);

        if !local.is_violation {
            tracing::debug!(
                message = truncate_for_log(message),
                "Message passed local checks"
            );
            return local;
        }

        let local_reason = local.reason_text().to_string();
        tracing::info!(
            reason = %local_reason,
            message = truncate_for_log(message),
            "Local rules flagged message"
        );

        match gateway.classify(message).await {
            Corroboration::Violation { role, reason } => {
                let classifier_reason = reason.as_deref().unwrap_or("no reason given");
                tracing::info!(role = %role, "Classifier corroborated local verdict");
                Verdict {
                    is_violation: true,
                    reason: Some(format!(
                        "Local reason: {}. Classifier reason: {}",
                        local_reason, classifier_reason
                    )),
                    source: VerdictSource::Combined,
                }
            }
            Corroboration::Clean { role } => {
                tracing::info!(
                    role = %role,
                    "Classifier did not confirm violation, local verdict stands"
                );
                local
            }
            Corroboration::Inconclusive => {
                tracing::warn!(
                    message = truncate_for_log(message),
                    "Corroboration inconclusive, local verdict stands"
                );
                local
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classifier_gateway::tests::{
        clean, down, violation, ScriptedClassifier,
    };
    use crate::core::classifier::DEFAULT_MAX_FAILURES;
    use crate::core::rules::{RuleDocument, RuleError, Severity, StopWordCategory};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct FixedRuleStore(RuleDocument);

    #[async_trait]
    impl RuleStore for FixedRuleStore {
        async fn load(&self) -> Result<RuleDocument, RuleError> {
            Ok(self.0.clone())
        }

        async fn save(&self, _document: &RuleDocument) -> Result<(), RuleError> {
            Ok(())
        }
    }

    async fn engine() -> ModerationEngine<FixedRuleStore> {
        let mut document = RuleDocument::default();
        document.stop_words.insert(
            "insults".to_string(),
            StopWordCategory {
                words: vec!["idiot".to_string()],
                severity: Severity::High,
                description: String::new(),
            },
        );
        let rules = RuleSet::load(FixedRuleStore(document)).await;
        ModerationEngine::new(Arc::new(rules), LocalFilter::default())
    }

    fn gateway_with(primary: ScriptedClassifier) -> ClassifierGateway {
        ClassifierGateway::new(DEFAULT_MAX_FAILURES, Duration::from_secs(1))
            .with_primary(Box::new(primary))
    }

    #[tokio::test]
    async fn test_clean_message_never_reaches_classifier() {
        let engine = engine().await;
        let primary = ScriptedClassifier::always("primary", violation("would flag"));
        let calls = Arc::clone(&primary.calls);
        let gateway = gateway_with(primary);

        let verdict = engine.moderate("What is a prime number?", &gateway).await;

        assert!(!verdict.is_violation);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corroborated_violation_combines_reasons() {
        let engine = engine().await;
        let gateway = gateway_with(ScriptedClassifier::always(
            "primary",
            violation("personal insult"),
        ));

        let verdict = engine.moderate("you are an idiot", &gateway).await;

        assert!(verdict.is_violation);
        assert_eq!(verdict.source, VerdictSource::Combined);
        let reason = verdict.reason_text();
        assert!(reason.contains("Forbidden word: 'idiot' (category: insults)"));
        assert!(reason.contains("personal insult"));
    }

    #[tokio::test]
    async fn test_classifier_cannot_overturn_local_violation() {
        let engine = engine().await;
        let gateway = gateway_with(ScriptedClassifier::always("primary", clean()));

        let verdict = engine.moderate("you are an idiot", &gateway).await;

        assert!(verdict.is_violation);
        assert_eq!(verdict.source, VerdictSource::Local);
        assert!(verdict.reason_text().contains("insults"));
    }

    #[tokio::test]
    async fn test_inconclusive_keeps_local_violation() {
        let engine = engine().await;
        let gateway = gateway_with(ScriptedClassifier::always("primary", down()));

        let verdict = engine.moderate("you are an idiot", &gateway).await;

        assert!(verdict.is_violation);
        assert_eq!(verdict.source, VerdictSource::Local);
    }

    #[tokio::test]
    async fn test_works_without_classifiers() {
        let engine = engine().await;

        let verdict = engine
            .moderate("idiotic question", &ClassifierGateway::disabled())
            .await;

        assert!(verdict.is_violation);
    }
}
