// In-memory implementation of LedgerStore.
//
// Nothing survives a restart. Used for ephemeral runs (`:memory:` in the
// configuration) and as the store behind the core service tests.

use crate::core::ledger::{
    LedgerError, LedgerStore, RecordUpdate, UserModerationRecord, ViolationLogEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

pub struct InMemoryLedgerStore {
    records: DashMap<u64, UserModerationRecord>,
    /// Append-only history, insertion order
    log: Mutex<Vec<ViolationLogEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; ties keep the later insertion first.
fn newest_first<'a>(
    entries: impl DoubleEndedIterator<Item = &'a ViolationLogEntry>,
    limit: usize,
) -> Vec<ViolationLogEntry> {
    let mut selected: Vec<ViolationLogEntry> = entries.rev().cloned().collect();
    selected.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    selected.truncate(limit);
    selected
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_record(
        &self,
        user_id: u64,
    ) -> Result<Option<UserModerationRecord>, LedgerError> {
        Ok(self.records.get(&user_id).map(|record| record.value().clone()))
    }

    async fn update_record(
        &self,
        user_id: u64,
        update: RecordUpdate<'_>,
        entry: Option<&ViolationLogEntry>,
    ) -> Result<UserModerationRecord, LedgerError> {
        // The entry guard locks the shard, so the record update and the log
        // append are seen together.
        let mut record = self
            .records
            .entry(user_id)
            .or_insert_with(|| UserModerationRecord::new(user_id));
        update(record.value_mut());

        if let Some(entry) = entry {
            self.log.lock().push(entry.clone());
        }
        Ok(record.value().clone())
    }

    async fn violation_log(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        let log = self.log.lock();
        Ok(newest_first(
            log.iter().filter(|entry| entry.user_id == user_id),
            limit,
        ))
    }

    async fn violations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        let log = self.log.lock();
        Ok(newest_first(
            log.iter().filter(|entry| entry.occurred_at >= since),
            limit,
        ))
    }

    async fn clear_violations(&self, user_id: u64) -> Result<u64, LedgerError> {
        let mut record = self
            .records
            .entry(user_id)
            .or_insert_with(|| UserModerationRecord::new(user_id));
        record.clear_violations();

        let mut log = self.log.lock();
        let before = log.len();
        log.retain(|entry| entry.user_id != user_id);
        Ok((before - log.len()) as u64)
    }
}
