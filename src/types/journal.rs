//! Journal and report records as stored and served.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One day's reflection entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub content: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    /// String value stored under `key`, if any
    pub fn text(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.content
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Saved analysis report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReport {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Report listing row without the body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<&SavedReport> for ReportSummary {
    fn from(report: &SavedReport) -> Self {
        Self {
            id: report.id.clone(),
            title: report.title.clone(),
            created_at: report.created_at,
        }
    }
}
