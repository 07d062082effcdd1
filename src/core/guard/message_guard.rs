// Message guard - the caller-side pipeline run for every inbound message.
//
// Order of checks:
// 1. Rate limit (admitted requests are counted, refused ones earn a rate
//    violation instead)
// 2. Active ban
// 3. Privileged bypass
// 4. Moderation (local rules, then classifier corroboration)
// 5. Violation recording and escalation
//
// A ledger failure aborts the pipeline before any ban is applied.

use super::guard_models::{GuardError, GuardOutcome, UserDirectory};
use crate::core::classifier::ClassifierGateway;
use crate::core::ledger::{EnforcementAction, LedgerStore, ViolationKind, ViolationLedger};
use crate::core::moderation::ModerationEngine;
use crate::core::rate::{RateGuard, RateTier};
use crate::core::rules::RuleStore;
use crate::core::text::truncate_for_log;
use chrono::Duration;

pub struct MessageGuard<R: RuleStore, L: LedgerStore> {
    rate: RateGuard,
    engine: ModerationEngine<R>,
    gateway: ClassifierGateway,
    ledger: ViolationLedger<L>,
    users: Box<dyn UserDirectory>,
}

impl<R: RuleStore, L: LedgerStore> MessageGuard<R, L> {
    pub fn new(
        rate: RateGuard,
        engine: ModerationEngine<R>,
        gateway: ClassifierGateway,
        ledger: ViolationLedger<L>,
        users: Box<dyn UserDirectory>,
    ) -> Self {
        Self {
            rate,
            engine,
            gateway,
            ledger,
            users,
        }
    }

    pub fn rate(&self) -> &RateGuard {
        &self.rate
    }

    pub fn engine(&self) -> &ModerationEngine<R> {
        &self.engine
    }

    pub fn gateway(&self) -> &ClassifierGateway {
        &self.gateway
    }

    pub fn ledger(&self) -> &ViolationLedger<L> {
        &self.ledger
    }

    /// Rate tier the user's messages are counted under.
    pub fn tier_for(&self, user_id: u64) -> RateTier {
        if self.users.is_privileged(user_id) {
            RateTier::Admin
        } else if self.users.is_new_user(user_id) {
            RateTier::NewUser
        } else {
            RateTier::Default
        }
    }

    /// Run every check for one message from `user_id`.
    pub async fn screen(&self, user_id: u64, text: &str) -> Result<GuardOutcome, GuardError> {
        let tier = self.tier_for(user_id);
        let decision = self.rate.try_admit(user_id, tier);
        if !decision.allowed {
            let violation_count = self.rate.add_violation(user_id);
            return Ok(GuardOutcome::RateLimited {
                seconds_to_reset: decision.seconds_to_reset.unwrap_or(0.0),
                violation_count,
            });
        }

        let ban = self.ledger.is_banned(user_id).await?;
        if ban.is_banned {
            tracing::info!(user_id, "Dropped message from banned user");
            return Ok(GuardOutcome::Banned {
                reason: ban.reason,
                until: ban.until,
            });
        }

        if self.users.is_privileged(user_id) {
            tracing::debug!(user_id, "Privileged user, moderation skipped");
            return Ok(GuardOutcome::Bypassed);
        }

        let verdict = self.engine.moderate(text, &self.gateway).await;
        if !verdict.is_violation {
            return Ok(GuardOutcome::Allowed);
        }

        let reason = verdict.reason_text().to_string();
        let count = self
            .ledger
            .record_violation(user_id, ViolationKind::ContentPolicy, &reason, text)
            .await?;

        match self.ledger.action_for(count) {
            EnforcementAction::Ban { minutes } => {
                self.ledger
                    .ban_user(user_id, &reason, Some(Duration::minutes(i64::from(minutes))))
                    .await?;
                tracing::warn!(
                    user_id,
                    count,
                    minutes,
                    message = truncate_for_log(text),
                    "Ban applied for repeated violations"
                );
                Ok(GuardOutcome::BanApplied {
                    minutes,
                    reason,
                    count,
                })
            }
            EnforcementAction::Warn | EnforcementAction::None => {
                tracing::info!(user_id, count, "User warned");
                Ok(GuardOutcome::Warned { reason, count })
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
