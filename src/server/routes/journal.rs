//! Journal, report and admin endpoints. All require a caller identity.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::journal::{JournalStats, SearchHit, TodoItem};
use crate::server::auth::AuthenticatedUser;
use crate::server::error::ApiResult;
use crate::server::state::AppState;
use crate::types::{GuanxinError, JournalEntry, ReportSummary, Result, SavedReport};

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| GuanxinError::BadRequest(format!("invalid date: {}", raw)))
}

// =============================================================================
// Entries
// =============================================================================

pub async fn list_dates(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<NaiveDate>>> {
    Ok(Json(state.journal.dates(&user).await?))
}

pub async fn get_entry(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(date): Path<String>,
) -> ApiResult<Json<JournalEntry>> {
    let date = parse_date(&date)?;
    Ok(Json(state.journal.entry(&user, date).await?))
}

pub async fn save_entry(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(date): Path<String>,
    payload: std::result::Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let date = parse_date(&date)?;
    let Json(content) = payload?;
    state.journal.save_entry(&user, date, content).await?;
    Ok(Json(json!({ "success": true })))
}

// =============================================================================
// To-dos
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TodoUpdate {
    pub done: bool,
}

pub async fn list_todos(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<TodoItem>>> {
    Ok(Json(state.journal.todos(&user).await?))
}

pub async fn set_todo(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path((date, key)): Path<(String, String)>,
    payload: std::result::Result<Json<TodoUpdate>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let date = parse_date(&date)?;
    let Json(update) = payload?;
    state
        .journal
        .set_todo_done(&user, date, &key, update.done)
        .await?;
    Ok(Json(json!({ "success": true })))
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct NewReport {
    #[serde(default)]
    pub title: String,
    pub content: String,
}

pub async fn list_reports(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<ReportSummary>>> {
    Ok(Json(state.journal.reports(&user).await?))
}

pub async fn save_report(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    payload: std::result::Result<Json<NewReport>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(report) = payload?;
    let saved = state
        .journal
        .save_report(&user, report.title, report.content)
        .await?;
    Ok(Json(json!({ "id": saved.id })))
}

pub async fn latest_report(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<SavedReport>> {
    let report = state
        .journal
        .latest_report(&user)
        .await?
        .ok_or_else(|| GuanxinError::NotFound("no saved report".to_string()))?;
    Ok(Json(report))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn stats(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<JournalStats>> {
    Ok(Json(state.journal.stats(&user).await?))
}

pub async fn search(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    query: std::result::Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let Query(query) = query?;
    Ok(Json(state.journal.search(&user, &query.q).await?))
}

pub async fn missing(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Json<Vec<NaiveDate>>> {
    Ok(Json(state.journal.missing_dates(&user).await?))
}
