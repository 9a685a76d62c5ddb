//! Sync history - SQLite log of pass and migration outcomes
//!
//! The host can show the most recent events without re-running anything.
//! The database lives in XDG_DATA_HOME/journalsync/history.db by default.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::notify::NoticeLevel;
use crate::status::{SyncResult, SyncStatus};

/// Operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sync,
    Pull,
    Push,
    Migration,
    Reindex,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Sync => "sync",
            Operation::Pull => "pull",
            Operation::Push => "push",
            Operation::Migration => "migration",
            Operation::Reindex => "reindex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Operation::Sync),
            "pull" => Some(Operation::Pull),
            "push" => Some(Operation::Push),
            "migration" => Some(Operation::Migration),
            "reindex" => Some(Operation::Reindex),
            _ => None,
        }
    }
}

/// A recorded event
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub trigger: Option<String>,
    pub status: Option<SyncStatus>,
    pub error_code: Option<String>,
    pub summary: String,
    pub files_changed: Option<i64>,
    pub data_directory: String,
}

impl SyncEvent {
    pub fn level(&self) -> NoticeLevel {
        match (self.status, &self.error_code) {
            (_, Some(_)) => NoticeLevel::Error,
            (Some(status), None) if status.needs_attention() => NoticeLevel::Error,
            (Some(SyncStatus::Committed | SyncStatus::Synced), None) => NoticeLevel::Success,
            _ => NoticeLevel::Info,
        }
    }
}

/// Builder for new events
#[derive(Debug)]
pub struct SyncEventBuilder {
    operation: Operation,
    data_directory: String,
    trigger: Option<String>,
    status: Option<SyncStatus>,
    error_code: Option<String>,
    summary: String,
    files_changed: Option<i64>,
}

impl SyncEventBuilder {
    pub fn new(operation: Operation, data_directory: &Path) -> Self {
        Self {
            operation,
            data_directory: data_directory.to_string_lossy().into_owned(),
            trigger: None,
            status: None,
            error_code: None,
            summary: String::new(),
            files_changed: None,
        }
    }

    pub fn trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn result(mut self, result: &SyncResult) -> Self {
        self.status = Some(result.status());
        self.summary = result.to_string();
        self.files_changed = result.files_changed().map(|n| n as i64);
        self
    }

    pub fn error(mut self, error: &SyncError) -> Self {
        self.error_code = Some(error.code().to_string());
        self.summary = error.to_string();
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// History database
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open or create the database at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self { conn };
        db.initialize()?;

        info!("History database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    trigger TEXT,
                    status INTEGER,
                    error_code TEXT,
                    summary TEXT NOT NULL,
                    files_changed INTEGER,
                    data_directory TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_events_time ON events(timestamp);
                CREATE INDEX IF NOT EXISTS idx_events_operation ON events(operation, timestamp);
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("History schema initialized");
        Ok(())
    }

    pub fn insert(&self, event: SyncEventBuilder) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO events (timestamp, operation, trigger, status, error_code, summary, files_changed, data_directory)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    Utc::now().to_rfc3339(),
                    event.operation.as_str(),
                    event.trigger,
                    event.status.map(SyncStatus::code),
                    event.error_code,
                    event.summary,
                    event.files_changed,
                    event.data_directory,
                ],
            )
            .context("Failed to insert event")?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent events first
    pub fn recent(&self, limit: usize) -> Result<Vec<SyncEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, operation, trigger, status, error_code, summary, files_changed, data_directory
            FROM events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SyncEvent {
                    id: row.get(0)?,
                    timestamp: row
                        .get::<_, String>(1)
                        .ok()
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(Utc::now),
                    operation: Operation::parse(&row.get::<_, String>(2)?).unwrap_or(Operation::Sync),
                    trigger: row.get(3)?,
                    status: row
                        .get::<_, Option<u8>>(4)?
                        .and_then(|code| SyncStatus::try_from(code).ok()),
                    error_code: row.get(5)?,
                    summary: row.get(6)?,
                    files_changed: row.get(7)?,
                    data_directory: row.get(8)?,
                })
            })
            .context("Failed to query events")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect events")?;

        Ok(events)
    }

    /// Delete all but the newest `keep` events
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM events WHERE id NOT IN (SELECT id FROM events ORDER BY id DESC LIMIT ?1)",
                params![keep as i64],
            )
            .context("Failed to prune events")?;
        Ok(deleted)
    }
}

/// Shared handle used by the engine; recording never fails a pass
///
/// SQLite calls block, so every access runs on the blocking pool.
#[derive(Clone)]
pub struct History {
    db: Arc<Mutex<HistoryDb>>,
}

/// Events kept after each insert
const MAX_EVENTS: usize = 1000;

impl History {
    pub fn new(db: HistoryDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn record(&self, event: SyncEventBuilder) {
        let outcome = self
            .with_db(move |db| db.insert(event).and_then(|_| db.prune(MAX_EVENTS)))
            .await;
        if let Err(e) = outcome {
            warn!("Failed to record sync history: {}", e);
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<SyncEvent>, SyncError> {
        self.with_db(move |db| db.recent(limit)).await
    }

    async fn with_db<T, F>(&self, work: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&HistoryDb) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            work(&*db)
        })
        .await
        .map_err(|e| SyncError::History(format!("history task failed: {}", e)))?
        .map_err(SyncError::history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn dir() -> PathBuf {
        PathBuf::from("/journal")
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = HistoryDb::open_in_memory().unwrap();
        let result = SyncResult::new(SyncStatus::Committed, Some("3 files".into()), Some(3));

        db.insert(SyncEventBuilder::new(Operation::Sync, &dir()).trigger("manual").result(&result))
            .unwrap();
        db.insert(
            SyncEventBuilder::new(Operation::Pull, &dir()).error(&SyncError::Network {
                operation: "Pull",
                message: "offline".into(),
            }),
        )
        .unwrap();

        let events = db.recent(10).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].operation, Operation::Pull);
        assert_eq!(events[0].error_code.as_deref(), Some("NETWORK_ERROR"));
        assert_eq!(events[0].level(), NoticeLevel::Error);

        assert_eq!(events[1].operation, Operation::Sync);
        assert_eq!(events[1].status, Some(SyncStatus::Committed));
        assert_eq!(events[1].files_changed, Some(3));
        assert_eq!(events[1].trigger.as_deref(), Some("manual"));
        assert_eq!(events[1].summary, "Committed: 3 files");
        assert_eq!(events[1].level(), NoticeLevel::Success);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let db = HistoryDb::open_in_memory().unwrap();
        for n in 0..5 {
            db.insert(SyncEventBuilder::new(Operation::Sync, &dir()).summary(format!("pass {}", n)))
                .unwrap();
        }

        assert_eq!(db.prune(2).unwrap(), 3);
        let events = db.recent(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].summary, "pass 4");
        assert_eq!(events[1].summary, "pass 3");
    }

    #[test]
    fn test_open_at_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("history.db");
        HistoryDb::open_at(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_shared_history_records() {
        let history = History::new(HistoryDb::open_in_memory().unwrap());
        let result = SyncResult::new(SyncStatus::Conflict, Some("Conflict in a.md".into()), None);
        history
            .record(SyncEventBuilder::new(Operation::Sync, &dir()).result(&result))
            .await;

        let events = history.recent(1).await.unwrap();
        assert_eq!(events[0].status, Some(SyncStatus::Conflict));
        assert_eq!(events[0].level(), NoticeLevel::Error);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_history_leaves_runtime_free() {
        let history = History::new(HistoryDb::open_in_memory().unwrap());
        let held = history.db.clone();
        let guard = held.lock().unwrap();

        // the database is busy; the runtime keeps polling other work
        let pending = tokio::spawn({
            let history = history.clone();
            async move {
                history
                    .record(SyncEventBuilder::new(Operation::Sync, &dir()).summary("queued"))
                    .await
            }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        drop(guard);
        pending.await.unwrap();
        let events = history.recent(5).await.unwrap();
        assert_eq!(events[0].summary, "queued");
    }

    #[tokio::test]
    async fn test_history_errors_carry_history_code() {
        let history = History::new(HistoryDb::open_in_memory().unwrap());
        history
            .with_db(|db| db.conn.execute_batch("DROP TABLE events").map_err(Into::into))
            .await
            .unwrap();

        let err = history.recent(1).await.unwrap_err();
        assert_eq!(err.code(), "HISTORY_ERROR");
        assert!(err.to_string().starts_with("History error"));
    }
}
