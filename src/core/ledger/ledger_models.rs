// Ledger domain models - per-user violation and ban bookkeeping.
//
// All lazy-expiry rules live on `UserModerationRecord` so every store and
// every call site applies them the same way.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Violations older than this stop counting toward escalation.
pub const VIOLATION_WINDOW_HOURS: i64 = 24;

pub fn violation_window() -> Duration {
    Duration::hours(VIOLATION_WINDOW_HOURS)
}

/// What kind of violation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Message content broke the content policy
    ContentPolicy,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::ContentPolicy => "content_policy",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content_policy" => Ok(ViolationKind::ContentPolicy),
            other => Err(format!("unknown violation type '{}'", other)),
        }
    }
}

/// Persisted moderation state of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserModerationRecord {
    pub user_id: u64,
    pub violations_count: u32,
    /// End of the current violation window. `None` while the user is clean.
    pub violations_expire_at: Option<DateTime<Utc>>,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    /// `None` together with `is_banned` means the ban never lapses.
    pub ban_until: Option<DateTime<Utc>>,
}

impl UserModerationRecord {
    /// A clean record.
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            violations_count: 0,
            violations_expire_at: None,
            is_banned: false,
            ban_reason: None,
            ban_until: None,
        }
    }

    fn violations_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.violations_expire_at.is_some_and(|expire| now > expire)
    }

    fn ban_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.ban_until.is_some_and(|until| now > until)
    }

    /// Whether `apply_lapses` would change anything.
    pub fn has_lapses(&self, now: DateTime<Utc>) -> bool {
        self.violations_lapsed(now) || self.ban_lapsed(now)
    }

    /// Reset the violation window if it has run out. Returns true if reset.
    pub fn expire_lapsed_violations(&mut self, now: DateTime<Utc>) -> bool {
        if self.violations_lapsed(now) {
            self.violations_count = 0;
            self.violations_expire_at = None;
            true
        } else {
            false
        }
    }

    /// Clear a timed ban that has run out. Returns true if cleared.
    pub fn lift_lapsed_ban(&mut self, now: DateTime<Utc>) -> bool {
        if self.ban_lapsed(now) {
            self.lift_ban();
            true
        } else {
            false
        }
    }

    /// Apply every lazy expiry rule.
    pub fn apply_lapses(&mut self, now: DateTime<Utc>) {
        self.expire_lapsed_violations(now);
        self.lift_lapsed_ban(now);
    }

    /// Count one more violation. The first violation of a window opens a
    /// new window of `window` length; later ones accumulate into it.
    pub fn register_violation(&mut self, now: DateTime<Utc>, window: Duration) -> u32 {
        self.expire_lapsed_violations(now);
        if self.violations_count == 0 || self.violations_expire_at.is_none() {
            self.violations_expire_at = Some(now + window);
        }
        self.violations_count += 1;
        self.violations_count
    }

    pub fn apply_ban(&mut self, reason: &str, until: Option<DateTime<Utc>>) {
        self.is_banned = true;
        self.ban_reason = Some(reason.to_string());
        self.ban_until = until;
    }

    pub fn lift_ban(&mut self) {
        self.is_banned = false;
        self.ban_reason = None;
        self.ban_until = None;
    }

    pub fn clear_violations(&mut self) {
        self.violations_count = 0;
        self.violations_expire_at = None;
    }

    pub fn ban_status(&self) -> BanStatus {
        BanStatus {
            is_banned: self.is_banned,
            reason: self.ban_reason.clone(),
            until: self.ban_until,
        }
    }
}

/// Answer to "is this user banned right now?".
#[derive(Debug, Clone, PartialEq)]
pub struct BanStatus {
    pub is_banned: bool,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

impl BanStatus {
    pub fn not_banned() -> Self {
        Self {
            is_banned: false,
            reason: None,
            until: None,
        }
    }
}

/// One entry of the append-only violation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationLogEntry {
    pub user_id: u64,
    pub kind: ViolationKind,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
    pub message_text: String,
}

// ============================================================================
// ESCALATION
// ============================================================================

/// What the caller should do after a violation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    /// Nothing recorded, nothing to do
    None,
    /// Tell the user off, no ban
    Warn,
    /// Ban for this many minutes
    Ban { minutes: u32 },
}

/// Maps the active violation count to an enforcement action.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Ban minutes for violation #2, #3, ... The last step repeats forever.
    ban_steps: Vec<u32>,
}

impl EscalationPolicy {
    pub fn new(ban_steps: Vec<u32>) -> Self {
        Self { ban_steps }
    }

    pub fn action_for(&self, count: u32) -> EnforcementAction {
        match count {
            0 => EnforcementAction::None,
            1 => EnforcementAction::Warn,
            n => {
                let step = (n - 2) as usize;
                match self.ban_steps.get(step).or_else(|| self.ban_steps.last()) {
                    Some(minutes) => EnforcementAction::Ban { minutes: *minutes },
                    None => EnforcementAction::Warn,
                }
            }
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        // 2 -> 5 min, 3 -> 10 min, 4 -> 30 min, 5+ -> 60 min
        Self::new(vec![5, 10, 30, 60])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_table() {
        let policy = EscalationPolicy::default();
        let actions: Vec<EnforcementAction> = (1..=7).map(|n| policy.action_for(n)).collect();

        assert_eq!(
            actions,
            vec![
                EnforcementAction::Warn,
                EnforcementAction::Ban { minutes: 5 },
                EnforcementAction::Ban { minutes: 10 },
                EnforcementAction::Ban { minutes: 30 },
                EnforcementAction::Ban { minutes: 60 },
                EnforcementAction::Ban { minutes: 60 },
                EnforcementAction::Ban { minutes: 60 },
            ]
        );
        assert_eq!(policy.action_for(0), EnforcementAction::None);
    }

    #[test]
    fn test_window_opens_on_first_violation_only() {
        let start = Utc::now();
        let mut record = UserModerationRecord::new(1);

        assert_eq!(record.register_violation(start, violation_window()), 1);
        let expiry = record.violations_expire_at.unwrap();
        assert_eq!(expiry, start + violation_window());

        let later = start + Duration::hours(3);
        assert_eq!(record.register_violation(later, violation_window()), 2);
        assert_eq!(record.violations_expire_at, Some(expiry));
    }

    #[test]
    fn test_lapsed_window_restarts_count() {
        let start = Utc::now();
        let mut record = UserModerationRecord::new(1);
        record.register_violation(start, violation_window());
        record.register_violation(start, violation_window());

        let next_day = start + Duration::hours(25);
        assert_eq!(record.register_violation(next_day, violation_window()), 1);
        assert_eq!(
            record.violations_expire_at,
            Some(next_day + violation_window())
        );
    }

    #[test]
    fn test_ban_lapses_only_when_timed() {
        let now = Utc::now();
        let mut timed = UserModerationRecord::new(1);
        timed.apply_ban("spam", Some(now - Duration::minutes(1)));
        assert!(timed.lift_lapsed_ban(now));
        assert_eq!(timed.ban_status(), BanStatus::not_banned());

        let mut permanent = UserModerationRecord::new(2);
        permanent.apply_ban("abuse", None);
        assert!(!permanent.lift_lapsed_ban(now + Duration::days(365)));
        assert!(permanent.is_banned);
    }

    #[test]
    fn test_violation_kind_roundtrip_names() {
        assert_eq!(
            "content_policy".parse::<ViolationKind>().unwrap(),
            ViolationKind::ContentPolicy
        );
        assert!("bogus".parse::<ViolationKind>().is_err());
    }
}
