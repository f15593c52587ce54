//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence for journal entries and saved reports:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode for concurrent readers during writes
//!
//! All methods are synchronous. Async callers go through
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use crate::types::{
    GuanxinError, JournalEntry, ReportSummary, Result, ResultExt, SavedReport, UserId,
};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

/// Migration definitions
struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Index journal entries by update time",
    up: "CREATE INDEX IF NOT EXISTS idx_logs_user_updated ON logs (user_id, updated_at)",
}];

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// Two connections per core, clamped
    pub fn auto() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(2);
        let max_size = (cores * 2).clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE);
        Self {
            max_size,
            min_idle: (max_size / 4).max(1),
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

type EntryRow = (String, String, String);
type ReportRow = (String, String, String, String);

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    /// Open database with custom pool configuration. The schema is created or
    /// migrated before the handle is returned.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| {
                GuanxinError::Storage(format!("Failed to create connection pool: {}", e))
            })?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// Every connection of the memory manager is a separate database, so the
    /// pool holds exactly one connection and never recycles it.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| {
                GuanxinError::Storage(format!("Failed to create in-memory pool: {}", e))
            })?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            GuanxinError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Create tables and bring an existing database up to the current version.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;
                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure errors or panics the transaction is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(GuanxinError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Journal Entries
    // =========================================================================

    pub fn get_entry(&self, user: &UserId, date: NaiveDate) -> Result<Option<JournalEntry>> {
        let conn = self.conn()?;
        let row: Option<EntryRow> = conn
            .query_row(
                "SELECT id, content, updated_at FROM logs WHERE user_id = ?1 AND id = ?2",
                params![user.as_str(), date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .with_context("Failed to load journal entry")?;

        row.map(entry_from_row).transpose()
    }

    /// Insert or replace the entry for `(user, date)`.
    pub fn upsert_entry(
        &self,
        user: &UserId,
        date: NaiveDate,
        content: &Map<String, Value>,
    ) -> Result<()> {
        let json = serde_json::to_string(content)?;
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                "INSERT INTO logs (user_id, id, content, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at",
                params![user.as_str(), date.to_string(), json, now],
            )
            .with_context("Failed to save journal entry")?;

        tracing::debug!(user = %user, %date, "Saved journal entry");
        Ok(())
    }

    /// Dates with an entry, oldest first
    pub fn list_dates(&self, user: &UserId) -> Result<Vec<NaiveDate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM logs WHERE user_id = ?1 ORDER BY id ASC")
            .with_context("Failed to prepare dates query")?;

        let ids = stmt
            .query_map(params![user.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch journal dates")?;

        ids.iter().map(|id| parse_date(id)).collect()
    }

    /// Entries newest first, at most `limit` when given
    pub fn list_entries(&self, user: &UserId, limit: Option<usize>) -> Result<Vec<JournalEntry>> {
        let conn = self.conn()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn
            .prepare(
                "SELECT id, content, updated_at FROM logs
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
            )
            .with_context("Failed to prepare entries query")?;

        let rows: Vec<EntryRow> = stmt
            .query_map(params![user.as_str(), limit], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch journal entries")?;

        rows.into_iter().map(entry_from_row).collect()
    }

    /// Set `<key>_done` on an existing entry. Returns false when the entry does not exist.
    pub fn set_flag(&self, user: &UserId, date: NaiveDate, key: &str, value: bool) -> Result<bool> {
        self.transaction(|tx| {
            let content: Option<String> = tx
                .query_row(
                    "SELECT content FROM logs WHERE user_id = ?1 AND id = ?2",
                    params![user.as_str(), date.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(content) = content else {
                return Ok(false);
            };

            let mut map: Map<String, Value> = serde_json::from_str(&content)?;
            map.insert(key.to_string(), Value::Bool(value));

            tx.execute(
                "UPDATE logs SET content = ?1, updated_at = ?2 WHERE user_id = ?3 AND id = ?4",
                params![
                    serde_json::to_string(&map)?,
                    Utc::now().to_rfc3339(),
                    user.as_str(),
                    date.to_string()
                ],
            )?;
            Ok(true)
        })
    }

    // =========================================================================
    // Reports
    // =========================================================================

    pub fn save_report(&self, user: &UserId, title: &str, content: &str) -> Result<SavedReport> {
        let report = SavedReport {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };

        self.conn()?
            .execute(
                "INSERT INTO reports (id, user_id, title, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    report.id,
                    user.as_str(),
                    report.title,
                    report.content,
                    report.created_at.to_rfc3339()
                ],
            )
            .with_context("Failed to save report")?;

        tracing::debug!(user = %user, id = %report.id, "Saved report");
        Ok(report)
    }

    pub fn latest_report(&self, user: &UserId) -> Result<Option<SavedReport>> {
        let conn = self.conn()?;
        let row: Option<ReportRow> = conn
            .query_row(
                "SELECT id, title, content, created_at FROM reports
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
                params![user.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .with_context("Failed to load latest report")?;

        row.map(report_from_row).transpose()
    }

    /// Reports newest first, without bodies
    pub fn list_reports(&self, user: &UserId) -> Result<Vec<ReportSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at FROM reports
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
            )
            .with_context("Failed to prepare reports query")?;

        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![user.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context("Failed to fetch reports")?;

        rows.into_iter()
            .map(|(id, title, created_at)| {
                Ok(ReportSummary {
                    id,
                    title,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context_fn(|| format!("Corrupted journal date '{}'", value))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context_fn(|| format!("Corrupted timestamp '{}'", value))
}

fn entry_from_row((id, content, updated_at): EntryRow) -> Result<JournalEntry> {
    let content: Map<String, Value> = serde_json::from_str(&content)
        .with_context_fn(|| format!("Corrupted journal content for {}", id))?;
    Ok(JournalEntry {
        date: parse_date(&id)?,
        content,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn report_from_row((id, title, content, created_at): ReportRow) -> Result<SavedReport> {
    Ok(SavedReport {
        created_at: parse_timestamp(&created_at)?,
        id,
        title,
        content,
    })
}
