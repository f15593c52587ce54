//! Journal Service
//!
//! Async facade over [`Database`]. Each call runs its synchronous SQLite work
//! on the blocking pool.

use chrono::{Local, NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::analytics::{
    self, JournalStats, SearchHit, TodoItem, compute_stats, done_key, is_todo_key,
};
use crate::config::JournalConfig;
use crate::storage::{Database, SharedDatabase};
use crate::types::{GuanxinError, JournalEntry, ReportSummary, Result, SavedReport, UserId};

/// Request key that never gets stored in an entry's content
const DATE_KEY: &str = "date";

#[derive(Clone)]
pub struct JournalService {
    db: SharedDatabase,
    config: JournalConfig,
}

impl JournalService {
    pub fn new(db: SharedDatabase, config: JournalConfig) -> Self {
        Self { db, config }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| GuanxinError::Storage(format!("Database task failed: {}", e)))?
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    // =========================================================================
    // Entries
    // =========================================================================

    pub async fn entry(&self, user: &UserId, date: NaiveDate) -> Result<JournalEntry> {
        let user = user.clone();
        self.blocking(move |db| db.get_entry(&user, date))
            .await?
            .ok_or_else(|| GuanxinError::NotFound(format!("journal entry {}", date)))
    }

    #[instrument(skip(self, content), fields(user = %user))]
    pub async fn save_entry(
        &self,
        user: &UserId,
        date: NaiveDate,
        mut content: Map<String, Value>,
    ) -> Result<()> {
        content.remove(DATE_KEY);
        let user = user.clone();
        self.blocking(move |db| db.upsert_entry(&user, date, &content))
            .await
    }

    pub async fn dates(&self, user: &UserId) -> Result<Vec<NaiveDate>> {
        let user = user.clone();
        self.blocking(move |db| db.list_dates(&user)).await
    }

    // =========================================================================
    // To-dos
    // =========================================================================

    pub async fn todos(&self, user: &UserId) -> Result<Vec<TodoItem>> {
        let user = user.clone();
        let limit = self.config.recent_todo_entries;
        let entries = self
            .blocking(move |db| db.list_entries(&user, Some(limit)))
            .await?;
        Ok(analytics::pending_todos(
            &entries,
            Utc::now(),
            self.config.todo_done_grace_days,
        ))
    }

    #[instrument(skip(self), fields(user = %user))]
    pub async fn set_todo_done(
        &self,
        user: &UserId,
        date: NaiveDate,
        key: &str,
        done: bool,
    ) -> Result<()> {
        if !is_todo_key(key) {
            return Err(GuanxinError::BadRequest(format!("unknown to-do key: {}", key)));
        }

        let user = user.clone();
        let flag = done_key(key);
        let updated = self
            .blocking(move |db| db.set_flag(&user, date, &flag, done))
            .await?;
        if !updated {
            return Err(GuanxinError::NotFound(format!("journal entry {}", date)));
        }
        debug!("To-do {} on {} marked done={}", key, date, done);
        Ok(())
    }

    // =========================================================================
    // Reports
    // =========================================================================

    pub async fn save_report(
        &self,
        user: &UserId,
        title: String,
        content: String,
    ) -> Result<SavedReport> {
        if content.trim().is_empty() {
            return Err(GuanxinError::BadRequest("report content is empty".to_string()));
        }
        let title = match title.trim() {
            "" => format!("{} 分析報告", Self::today()),
            t => t.to_string(),
        };

        let user = user.clone();
        self.blocking(move |db| db.save_report(&user, &title, &content))
            .await
    }

    pub async fn latest_report(&self, user: &UserId) -> Result<Option<SavedReport>> {
        let user = user.clone();
        self.blocking(move |db| db.latest_report(&user)).await
    }

    pub async fn reports(&self, user: &UserId) -> Result<Vec<ReportSummary>> {
        let user = user.clone();
        self.blocking(move |db| db.list_reports(&user)).await
    }

    // =========================================================================
    // Analytics
    // =========================================================================

    pub async fn stats(&self, user: &UserId) -> Result<JournalStats> {
        Ok(compute_stats(&self.dates(user).await?, Self::today()))
    }

    pub async fn search(&self, user: &UserId, query: &str) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let user = user.clone();
        let entries = self.blocking(move |db| db.list_entries(&user, None)).await?;
        Ok(analytics::search_entries(&entries, query))
    }

    pub async fn missing_dates(&self, user: &UserId) -> Result<Vec<NaiveDate>> {
        let dates = self.dates(user).await?;
        Ok(analytics::missing_dates(
            &dates,
            Self::today(),
            self.config.missing_window_days,
        ))
    }
}
