// Guard domain models - caller capabilities and per-message outcomes.

use crate::core::ledger::LedgerError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum GuardError {
    /// The violation or ban could not be persisted; nothing was enforced.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

// ============================================================================
// CAPABILITY PORT
// ============================================================================

/// Caller-provided knowledge about users.
pub trait UserDirectory: Send + Sync {
    /// Privileged users bypass moderation and get the admin rate tier.
    fn is_privileged(&self, user_id: u64) -> bool;

    /// New users get the stricter rate tier.
    fn is_new_user(&self, _user_id: u64) -> bool {
        false
    }
}

/// Fixed user lists, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    admins: HashSet<u64>,
    new_users: HashSet<u64>,
}

impl StaticUserDirectory {
    pub fn new(
        admins: impl IntoIterator<Item = u64>,
        new_users: impl IntoIterator<Item = u64>,
    ) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            new_users: new_users.into_iter().collect(),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn is_privileged(&self, user_id: u64) -> bool {
        self.admins.contains(&user_id)
    }

    fn is_new_user(&self, user_id: u64) -> bool {
        self.new_users.contains(&user_id)
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// What happened to one inbound message. Wording is up to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    /// Passed every check
    Allowed,
    /// Privileged sender, moderation skipped
    Bypassed,
    /// Too many requests; `violation_count` is the rate violation total
    RateLimited {
        seconds_to_reset: f64,
        violation_count: u32,
    },
    /// Sender is currently banned, message dropped unseen
    Banned {
        reason: Option<String>,
        until: Option<DateTime<Utc>>,
    },
    /// First violation in the window
    Warned { reason: String, count: u32 },
    /// Repeated violation, sender banned
    BanApplied {
        minutes: u32,
        reason: String,
        count: u32,
    },
}

