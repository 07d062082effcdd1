// SQLite-backed violation ledger.
//
// Tables:
// - moderation_users: one row per user (violation window + ban state)
// - violations: append-only violation history
//
// Timestamps are stored as UTC RFC 3339 text with a fixed precision so that
// string comparison orders them chronologically.

use crate::core::ledger::{
    LedgerError, LedgerStore, RecordUpdate, UserModerationRecord, ViolationKind,
    ViolationLogEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn from_db_time_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, LedgerError> {
    raw.as_deref().map(from_db_time).transpose()
}

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

pub struct SqliteLedgerStore {
    pool: Pool<Sqlite>,
}

impl SqliteLedgerStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let options = SqliteConnectOptions::from_str(&conn_str)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_users (
                user_id INTEGER PRIMARY KEY,
                violations_count INTEGER NOT NULL DEFAULT 0,
                violations_expire_at TEXT,
                is_banned INTEGER NOT NULL DEFAULT 0,
                ban_reason TEXT,
                ban_until TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                violation_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                message_text TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_violations_user_time
                ON violations(user_id, occurred_at);
            CREATE INDEX IF NOT EXISTS idx_violations_time
                ON violations(occurred_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    /// Start a transaction that holds the write lock from its first
    /// statement. A deferred transaction that reads before writing cannot
    /// wait for the lock and fails with SQLITE_BUSY under concurrent writers.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, LedgerError> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage)
    }

    fn record_from_row(row: &SqliteRow) -> Result<UserModerationRecord, LedgerError> {
        let user_id: i64 = row.get("user_id");
        let count: i64 = row.get("violations_count");
        let is_banned: i64 = row.get("is_banned");

        Ok(UserModerationRecord {
            user_id: user_id as u64,
            violations_count: u32::try_from(count)
                .map_err(|_| LedgerError::Corrupt(format!("negative count for {}", user_id)))?,
            violations_expire_at: from_db_time_opt(row.get("violations_expire_at"))?,
            is_banned: is_banned != 0,
            ban_reason: row.get("ban_reason"),
            ban_until: from_db_time_opt(row.get("ban_until"))?,
        })
    }

    fn entry_from_row(row: &SqliteRow) -> Result<ViolationLogEntry, LedgerError> {
        let user_id: i64 = row.get("user_id");
        let kind: String = row.get("violation_type");
        let occurred_at: String = row.get("occurred_at");

        Ok(ViolationLogEntry {
            user_id: user_id as u64,
            kind: kind.parse::<ViolationKind>().map_err(LedgerError::Corrupt)?,
            reason: row.get("reason"),
            occurred_at: from_db_time(&occurred_at)?,
            message_text: row.get("message_text"),
        })
    }
}

const SELECT_RECORD: &str = r#"
    SELECT user_id, violations_count, violations_expire_at, is_banned, ban_reason, ban_until
    FROM moderation_users
    WHERE user_id = ?
"#;

const SELECT_ENTRY: &str =
    "SELECT user_id, violation_type, reason, occurred_at, message_text FROM violations";

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn load_record(
        &self,
        user_id: u64,
    ) -> Result<Option<UserModerationRecord>, LedgerError> {
        let row = sqlx::query(SELECT_RECORD)
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn update_record(
        &self,
        user_id: u64,
        update: RecordUpdate<'_>,
        entry: Option<&ViolationLogEntry>,
    ) -> Result<UserModerationRecord, LedgerError> {
        // Read, modify and write inside one transaction; dropping `tx` on an
        // early return rolls everything back.
        let mut tx = self.begin_write().await?;

        let row = sqlx::query(SELECT_RECORD)
            .bind(user_id as i64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

        let mut record = match row {
            Some(row) => Self::record_from_row(&row)?,
            None => UserModerationRecord::new(user_id),
        };
        update(&mut record);

        sqlx::query(
            r#"
            INSERT INTO moderation_users
                (user_id, violations_count, violations_expire_at, is_banned, ban_reason, ban_until)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                violations_count = excluded.violations_count,
                violations_expire_at = excluded.violations_expire_at,
                is_banned = excluded.is_banned,
                ban_reason = excluded.ban_reason,
                ban_until = excluded.ban_until
            "#,
        )
        .bind(user_id as i64)
        .bind(i64::from(record.violations_count))
        .bind(record.violations_expire_at.map(to_db_time))
        .bind(record.is_banned as i64)
        .bind(record.ban_reason.as_deref())
        .bind(record.ban_until.map(to_db_time))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if let Some(entry) = entry {
            sqlx::query(
                r#"
                INSERT INTO violations (user_id, violation_type, reason, occurred_at, message_text)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.user_id as i64)
            .bind(entry.kind.as_str())
            .bind(&entry.reason)
            .bind(to_db_time(entry.occurred_at))
            .bind(&entry.message_text)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(record)
    }

    async fn violation_log(
        &self,
        user_id: u64,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "{} WHERE user_id = ? ORDER BY occurred_at DESC, id DESC LIMIT ?",
            SELECT_ENTRY
        ))
        .bind(user_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn violations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ViolationLogEntry>, LedgerError> {
        let rows = sqlx::query(&format!(
            "{} WHERE occurred_at >= ? ORDER BY occurred_at DESC, id DESC LIMIT ?",
            SELECT_ENTRY
        ))
        .bind(to_db_time(since))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn clear_violations(&self, user_id: u64) -> Result<u64, LedgerError> {
        let mut tx = self.begin_write().await?;

        let removed = sqlx::query("DELETE FROM violations WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();

        sqlx::query(
            r#"
            UPDATE moderation_users
            SET violations_count = 0, violations_expire_at = NULL
            WHERE user_id = ?
            "#,
        )
        .bind(user_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(removed)
    }
}
