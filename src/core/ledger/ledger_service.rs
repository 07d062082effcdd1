// Violation ledger - core business logic for violation counting and bans.
//
// This service handles:
// - Recording violations (history entry + windowed counter, one transaction)
// - Lazy expiry of violation windows and timed bans
// - Ban / unban / clear-history administrative actions
// - Mapping the active count to an enforcement action
//
// Updates for the same user are serialized through a per-user async lock on
// top of the store's own transaction, so two sessions of one user cannot lose
// an increment.

use super::ledger_models::{
    violation_window, BanStatus, EnforcementAction, EscalationPolicy, UserModerationRecord,
    ViolationKind, ViolationLogEntry,
};
use crate::core::text::truncate_for_log;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Mutation applied to a record inside a store transaction.
pub type RecordUpdate<'a> = &'a (dyn Fn(&mut UserModerationRecord) + Send + Sync);

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read a user's record as stored, without applying any expiry.
    async fn load_record(&self, user_id: u64)
        -> Result<Option<UserModerationRecord>, LedgerError>;

    /// Atomically load (or create) a user's record, apply `update`, append
    /// `entry` to the history if given, and persist. Returns the new record.
    async fn update_record(
        &self,
        user_id: u64,
        update: RecordUpdate<'_>,
        entry: Option<&ViolationLogEntry>,
    ) -> Result<UserModerationRecord, LedgerError>;

    /// A user's history, most recent first.
    async fn violation_log(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError>;

    /// Everyone's history since `since`, most recent first.
    async fn violations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError>;

    /// Delete a user's history and zero their counter in one transaction.
    /// Returns how many history entries were removed.
    async fn clear_violations(&self, user_id: u64) -> Result<u64, LedgerError>;
}

// Lets the composition root pick a backend at runtime.
#[async_trait]
impl LedgerStore for Box<dyn LedgerStore> {
    async fn load_record(
        &self,
        user_id: u64,
    ) -> Result<Option<UserModerationRecord>, LedgerError> {
        (**self).load_record(user_id).await
    }

    async fn update_record(
        &self,
        user_id: u64,
        update: RecordUpdate<'_>,
        entry: Option<&ViolationLogEntry>,
    ) -> Result<UserModerationRecord, LedgerError> {
        (**self).update_record(user_id, update, entry).await
    }

    async fn violation_log(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        (**self).violation_log(user_id, limit).await
    }

    async fn violations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        (**self).violations_since(since, limit).await
    }

    async fn clear_violations(&self, user_id: u64) -> Result<u64, LedgerError> {
        (**self).clear_violations(user_id).await
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Exclusive access to one user's record. The lock table entry is removed
/// when its last holder lets go.
struct UserLock<'a> {
    locks: &'a DashMap<u64, Arc<Mutex<()>>>,
    user_id: u64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct ViolationLedger<S: LedgerStore> {
    store: S,
    policy: EscalationPolicy,
    window: Duration,
    user_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl<S: LedgerStore> ViolationLedger<S> {
    /// Create a ledger with the default 24h window and escalation table.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, EscalationPolicy::default())
    }

    pub fn with_policy(store: S, policy: EscalationPolicy) -> Self {
        Self {
            store,
            policy,
            window: violation_window(),
            user_locks: DashMap::new(),
        }
    }

    async fn lock_user(&self, user_id: u64) -> UserLock<'_> {
        let lock = Arc::clone(self.user_locks.entry(user_id).or_default().value());
        UserLock {
            locks: &self.user_locks,
            user_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Record a violation and return the user's active violation count.
    pub async fn record_violation(
        &self,
        user_id: u64,
        kind: ViolationKind,
        reason: &str,
        message_text: &str,
    ) -> Result<u32, LedgerError> {
        self.record_violation_at(user_id, kind, reason, message_text, Utc::now())
            .await
    }

    pub async fn record_violation_at(
        &self,
        user_id: u64,
        kind: ViolationKind,
        reason: &str,
        message_text: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError> {
        let entry = ViolationLogEntry {
            user_id,
            kind,
            reason: reason.to_string(),
            occurred_at: now,
            message_text: message_text.to_string(),
        };
        let window = self.window;

        let _guard = self.lock_user(user_id).await;
        let record = self
            .store
            .update_record(
                user_id,
                &|record: &mut UserModerationRecord| {
                    record.register_violation(now, window);
                },
                Some(&entry),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id,
                    error = %e,
                    message = truncate_for_log(message_text),
                    "Failed to record violation"
                );
                e
            })?;

        tracing::warn!(
            user_id,
            kind = %kind,
            count = record.violations_count,
            reason = %reason,
            message = truncate_for_log(message_text),
            "Violation recorded"
        );
        Ok(record.violations_count)
    }

    /// The user's record with all lazy expiry applied (and persisted if
    /// anything lapsed). Every read path goes through here.
    pub async fn active_state(&self, user_id: u64) -> Result<UserModerationRecord, LedgerError> {
        self.active_state_at(user_id, Utc::now()).await
    }

    pub async fn active_state_at(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<UserModerationRecord, LedgerError> {
        let record = match self.store.load_record(user_id).await? {
            Some(record) => record,
            None => return Ok(UserModerationRecord::new(user_id)),
        };

        if !record.has_lapses(now) {
            return Ok(record);
        }

        let _guard = self.lock_user(user_id).await;
        let updated = self
            .store
            .update_record(
                user_id,
                &|record: &mut UserModerationRecord| record.apply_lapses(now),
                None,
            )
            .await?;

        if record.is_banned && !updated.is_banned {
            tracing::info!(user_id, "Ban expired and was lifted");
        }
        if record.violations_count > 0 && updated.violations_count == 0 {
            tracing::info!(user_id, "Violation window expired, count reset");
        }
        Ok(updated)
    }

    /// Active violation count after expiry.
    pub async fn violation_count(&self, user_id: u64) -> Result<u32, LedgerError> {
        Ok(self.active_state(user_id).await?.violations_count)
    }

    /// Is the user banned right now? A lapsed ban is cleared by this call.
    pub async fn is_banned(&self, user_id: u64) -> Result<BanStatus, LedgerError> {
        self.is_banned_at(user_id, Utc::now()).await
    }

    pub async fn is_banned_at(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<BanStatus, LedgerError> {
        let record = self.active_state_at(user_id, now).await?;
        if record.is_banned {
            Ok(record.ban_status())
        } else {
            Ok(BanStatus::not_banned())
        }
    }

    /// Ban a user. `duration` of `None` bans until an explicit unban.
    pub async fn ban_user(
        &self,
        user_id: u64,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<BanStatus, LedgerError> {
        self.ban_user_at(user_id, reason, duration, Utc::now()).await
    }

    pub async fn ban_user_at(
        &self,
        user_id: u64,
        reason: &str,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<BanStatus, LedgerError> {
        let until = duration.map(|d| now + d);

        let _guard = self.lock_user(user_id).await;
        let record = self
            .store
            .update_record(
                user_id,
                &|record: &mut UserModerationRecord| record.apply_ban(reason, until),
                None,
            )
            .await?;

        tracing::warn!(
            user_id,
            reason = %reason,
            until = ?until,
            "User banned"
        );
        Ok(record.ban_status())
    }

    pub async fn unban_user(&self, user_id: u64) -> Result<(), LedgerError> {
        let _guard = self.lock_user(user_id).await;
        self.store
            .update_record(
                user_id,
                &|record: &mut UserModerationRecord| record.lift_ban(),
                None,
            )
            .await?;

        tracing::info!(user_id, "User unbanned");
        Ok(())
    }

    /// Zero the counter and delete the user's history. Irreversible.
    pub async fn clear_violations(&self, user_id: u64) -> Result<u64, LedgerError> {
        let _guard = self.lock_user(user_id).await;
        let removed = self.store.clear_violations(user_id).await?;

        tracing::info!(user_id, removed, "Violation history cleared");
        Ok(removed)
    }

    /// A user's history, most recent first.
    pub async fn violation_history(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        self.store.violation_log(user_id, limit).await
    }

    /// Everyone's violations since `since`, most recent first.
    pub async fn recent_violations(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        self.store.violations_since(since, limit).await
    }

    /// What the caller should do for a freshly returned violation count.
    pub fn action_for(&self, count: u32) -> EnforcementAction {
        self.policy.action_for(count)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ledger::InMemoryLedgerStore;

    fn ledger() -> ViolationLedger<InMemoryLedgerStore> {
        ViolationLedger::new(InMemoryLedgerStore::new())
    }

    /// Record a violation and apply the escalation the way the caller does.
    async fn violate_and_enforce(
        ledger: &ViolationLedger<InMemoryLedgerStore>,
        now: DateTime<Utc>,
    ) -> Option<u32> {
        let count = ledger
            .record_violation_at(7, ViolationKind::ContentPolicy, "spam", "buy now", now)
            .await
            .unwrap();
        match ledger.action_for(count) {
            EnforcementAction::Ban { minutes } => {
                ledger
                    .ban_user_at(7, "spam", Some(Duration::minutes(minutes as i64)), now)
                    .await
                    .unwrap();
                Some(minutes)
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_five_violations_escalate() {
        let ledger = ledger();
        let start = Utc::now();

        let mut bans = Vec::new();
        for i in 0..5 {
            bans.push(violate_and_enforce(&ledger, start + Duration::minutes(i * 70)).await);
        }

        assert_eq!(bans, vec![None, Some(5), Some(10), Some(30), Some(60)]);
    }

    #[tokio::test]
    async fn test_expired_window_restarts_at_one() {
        let ledger = ledger();
        let start = Utc::now();

        for _ in 0..3 {
            ledger
                .record_violation_at(1, ViolationKind::ContentPolicy, "r", "m", start)
                .await
                .unwrap();
        }

        let later = start + Duration::hours(24) + Duration::seconds(1);
        let count = ledger
            .record_violation_at(1, ViolationKind::ContentPolicy, "r", "m", later)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let state = ledger.active_state_at(1, later).await.unwrap();
        assert_eq!(
            state.violations_expire_at,
            Some(later + Duration::hours(24))
        );
    }

    #[tokio::test]
    async fn test_count_reads_apply_expiry() {
        let ledger = ledger();
        let start = Utc::now();
        ledger
            .record_violation_at(1, ViolationKind::ContentPolicy, "r", "m", start)
            .await
            .unwrap();

        let state = ledger
            .active_state_at(1, start + Duration::hours(30))
            .await
            .unwrap();
        assert_eq!(state.violations_count, 0);
        assert_eq!(state.violations_expire_at, None);

        // The reset was persisted, not just computed
        let stored = ledger.store.load_record(1).await.unwrap().unwrap();
        assert_eq!(stored.violations_count, 0);
    }

    #[tokio::test]
    async fn test_lapsed_ban_is_cleared_by_query() {
        let ledger = ledger();
        let now = Utc::now();
        ledger
            .ban_user_at(3, "flood", Some(Duration::minutes(5)), now)
            .await
            .unwrap();

        let status = ledger.is_banned_at(3, now + Duration::minutes(1)).await.unwrap();
        assert!(status.is_banned);
        assert_eq!(status.reason.as_deref(), Some("flood"));

        let after = now + Duration::minutes(6);
        assert_eq!(
            ledger.is_banned_at(3, after).await.unwrap(),
            BanStatus::not_banned()
        );
        // Idempotent, and the stored record is clean
        assert_eq!(
            ledger.is_banned_at(3, after).await.unwrap(),
            BanStatus::not_banned()
        );
        let stored = ledger.store.load_record(3).await.unwrap().unwrap();
        assert!(!stored.is_banned);
        assert_eq!(stored.ban_until, None);
    }

    #[tokio::test]
    async fn test_unban_and_permanent_ban() {
        let ledger = ledger();
        ledger.ban_user(4, "abuse", None).await.unwrap();
        assert!(ledger.is_banned(4).await.unwrap().is_banned);

        ledger.unban_user(4).await.unwrap();
        assert!(!ledger.is_banned(4).await.unwrap().is_banned);
    }

    #[tokio::test]
    async fn test_clear_violations_removes_history() {
        let ledger = ledger();
        for text in ["one", "two"] {
            ledger
                .record_violation(5, ViolationKind::ContentPolicy, "r", text)
                .await
                .unwrap();
        }
        assert_eq!(ledger.violation_history(5, 10).await.unwrap().len(), 2);

        assert_eq!(ledger.clear_violations(5).await.unwrap(), 2);
        assert_eq!(ledger.violation_count(5).await.unwrap(), 0);
        assert!(ledger.violation_history(5, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let ledger = ledger();
        let start = Utc::now();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            ledger
                .record_violation_at(
                    9,
                    ViolationKind::ContentPolicy,
                    "r",
                    text,
                    start + Duration::seconds(i as i64),
                )
                .await
                .unwrap();
        }

        let history = ledger.violation_history(9, 2).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|e| e.message_text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second"]);
    }

    #[tokio::test]
    async fn test_concurrent_violations_are_not_lost() {
        let ledger = Arc::new(ledger());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .record_violation(11, ViolationKind::ContentPolicy, "r", "m")
                    .await
                    .unwrap()
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
        assert!(ledger.user_locks.is_empty());
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let ledger = ledger();
        for user_id in 0..10 {
            ledger
                .record_violation(user_id, ViolationKind::ContentPolicy, "r", "m")
                .await
                .unwrap();
            ledger.ban_user(user_id, "r", None).await.unwrap();
            ledger.unban_user(user_id).await.unwrap();
        }
        assert!(ledger.user_locks.is_empty());

        let held = ledger.lock_user(3).await;
        assert_eq!(ledger.user_locks.len(), 1);
        drop(held);
        assert!(ledger.user_locks.is_empty());
    }
}
