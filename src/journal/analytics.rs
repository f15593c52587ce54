//! Pure journal analytics over already-loaded entries.
//!
//! Every function takes "today" or "now" explicitly so results do not depend
//! on the wall clock.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::journal::{DONE_SUFFIX, PREVIEW_CHARS, TODO_KEYS};
use crate::types::JournalEntry;

/// Characters of context kept before a search match
const PREVIEW_LEAD_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub date: NaiveDate,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub date: NaiveDate,
    pub key: String,
    pub content: String,
    pub done: bool,
}

/// Key holding the done flag of a to-do
pub fn done_key(todo_key: &str) -> String {
    format!("{}{}", todo_key, DONE_SUFFIX)
}

pub fn is_todo_key(key: &str) -> bool {
    TODO_KEYS.contains(&key)
}

// =============================================================================
// Streaks
// =============================================================================

pub fn compute_stats(dates: &[NaiveDate], today: NaiveDate) -> JournalStats {
    let days: BTreeSet<NaiveDate> = dates.iter().copied().collect();

    let mut longest = 0u32;
    let mut run = 0u32;
    let mut previous: Option<NaiveDate> = None;
    for &day in &days {
        run = match previous {
            Some(p) if p.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }

    let anchor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt().filter(|yesterday| days.contains(yesterday))
    };

    let mut current = 0u32;
    let mut cursor = anchor;
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        current += 1;
        cursor = day.pred_opt();
    }

    JournalStats {
        current_streak: current,
        longest_streak: longest,
        total_days: days.len() as u32,
    }
}

// =============================================================================
// Search
// =============================================================================

/// Case-insensitive substring search. `entries` are expected newest first and
/// the hits keep that order.
pub fn search_entries(entries: &[JournalEntry], query: &str) -> Vec<SearchHit> {
    let needle = fold(query.trim());
    if needle.is_empty() {
        return Vec::new();
    }

    entries
        .iter()
        .filter_map(|entry| {
            entry
                .content
                .values()
                .filter_map(|v| v.as_str())
                .find_map(|text| preview_match(text, &needle))
                .map(|preview| SearchHit {
                    date: entry.date,
                    preview,
                })
        })
        .collect()
}

fn fold(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

fn preview_match(text: &str, needle: &[char]) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let folded = fold(text);
    let pos = folded.windows(needle.len()).position(|w| w == needle)?;

    let start = pos.saturating_sub(PREVIEW_LEAD_CHARS);
    let end = (start + PREVIEW_CHARS).min(chars.len());
    let start = end.saturating_sub(PREVIEW_CHARS).min(start);
    Some(chars[start..end].iter().collect::<String>().replace('\n', " "))
}

// =============================================================================
// Missing dates
// =============================================================================

/// Dates in `[today - window_days, today - 1]` without an entry, newest first.
/// A user with no entries at all gets nothing back.
pub fn missing_dates(dates: &[NaiveDate], today: NaiveDate, window_days: i64) -> Vec<NaiveDate> {
    if dates.is_empty() {
        return Vec::new();
    }
    let recorded: BTreeSet<NaiveDate> = dates.iter().copied().collect();

    (1..=window_days)
        .map(|offset| today - Duration::days(offset))
        .filter(|day| !recorded.contains(day))
        .collect()
}

// =============================================================================
// To-dos
// =============================================================================

/// To-dos of the given entries. Done items stay listed while their entry was
/// updated less than `grace_days` ago.
pub fn pending_todos(
    entries: &[JournalEntry],
    now: DateTime<Utc>,
    grace_days: i64,
) -> Vec<TodoItem> {
    let grace = Duration::days(grace_days);
    let mut items = Vec::new();

    for entry in entries {
        let recent = now - entry.updated_at <= grace;
        for key in TODO_KEYS {
            let Some(content) = entry.text(key).map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            let done = entry.flag(&done_key(key));
            if !done || recent {
                items.push(TodoItem {
                    date: entry.date,
                    key: key.to_string(),
                    content: content.to_string(),
                    done,
                });
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn entry(date: &str, content: Value, updated_at: DateTime<Utc>) -> JournalEntry {
        let content: Map<String, Value> = content.as_object().cloned().unwrap();
        JournalEntry {
            date: day(date),
            content,
            updated_at,
        }
    }

    #[test]
    fn test_stats_streak_through_today() {
        let dates = [
            day("2026-03-01"),
            day("2026-03-02"),
            day("2026-03-04"),
            day("2026-03-05"),
            day("2026-03-06"),
        ];
        let stats = compute_stats(&dates, day("2026-03-06"));
        assert_eq!(stats.current_streak, 3);
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.total_days, 5);
    }

    #[test]
    fn test_stats_streak_ending_yesterday_counts() {
        let dates = [day("2026-03-04"), day("2026-03-05")];
        assert_eq!(compute_stats(&dates, day("2026-03-06")).current_streak, 2);
        assert_eq!(compute_stats(&dates, day("2026-03-07")).current_streak, 0);
    }

    #[test]
    fn test_stats_empty_and_duplicates() {
        assert_eq!(compute_stats(&[], day("2026-01-01")), JournalStats::default());

        let dates = [day("2026-01-01"), day("2026-01-01")];
        let stats = compute_stats(&dates, day("2026-01-01"));
        assert_eq!(stats.total_days, 1);
        assert_eq!(stats.longest_streak, 1);
    }

    #[test]
    fn test_stats_across_month_boundary() {
        let dates = [day("2026-02-27"), day("2026-02-28"), day("2026-03-01")];
        assert_eq!(compute_stats(&dates, day("2026-03-01")).longest_streak, 3);
    }

    #[test]
    fn test_search_case_insensitive_newest_first() {
        let now = Utc::now();
        let entries = vec![
            entry("2026-03-02", json!({"mood": "Went RUNNING today"}), now),
            entry("2026-03-01", json!({"mood": "quiet", "note": "running late"}), now),
            entry("2026-02-28", json!({"mood": "tired", "score": 3}), now),
        ];

        let hits = search_entries(&entries, "running");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].date, day("2026-03-02"));
        assert_eq!(hits[0].preview, "Went RUNNING today");
        assert_eq!(hits[1].preview, "running late");
    }

    #[test]
    fn test_search_blank_query() {
        let entries = vec![entry("2026-03-02", json!({"mood": "x"}), Utc::now())];
        assert!(search_entries(&entries, "   ").is_empty());
    }

    #[test]
    fn test_search_preview_is_bounded_window() {
        let long = format!("{}感恩{}", "前".repeat(100), "後".repeat(100));
        let entries = vec![entry("2026-03-02", json!({ "note": long }), Utc::now())];

        let preview = &search_entries(&entries, "感恩")[0].preview;
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert!(preview.contains("感恩"));
        assert!(preview.starts_with(&"前".repeat(PREVIEW_LEAD_CHARS)));
    }

    #[test]
    fn test_search_match_near_end_keeps_full_window() {
        let text = format!("{}end", "a".repeat(200));
        let entries = vec![entry("2026-03-02", json!({ "note": text }), Utc::now())];
        let preview = &search_entries(&entries, "END")[0].preview;
        assert_eq!(preview.chars().count(), PREVIEW_CHARS);
        assert!(preview.ends_with("end"));
    }

    #[test]
    fn test_missing_dates_window() {
        let today = day("2026-03-10");
        let dates = [day("2026-03-09"), day("2026-03-07"), day("2026-03-10")];
        let missing = missing_dates(&dates, today, 4);
        assert_eq!(missing, vec![day("2026-03-08"), day("2026-03-06")]);
    }

    #[test]
    fn test_missing_dates_without_entries() {
        assert!(missing_dates(&[], day("2026-03-10"), 30).is_empty());
    }

    #[test]
    fn test_pending_todos_visibility() {
        let now = Utc::now();
        let old = now - Duration::days(10);
        let entries = vec![
            entry(
                "2026-03-05",
                json!({
                    "love_body_todo": "散步",
                    "love_body_todo_done": true,
                    "steady_mind_todo": "冥想",
                }),
                now,
            ),
            entry(
                "2026-02-20",
                json!({
                    "love_speech_todo": "道謝",
                    "love_speech_todo_done": true,
                    "steady_body_todo": "早睡",
                    "steady_speech_todo": "   ",
                }),
                old,
            ),
        ];

        let todos = pending_todos(&entries, now, 3);
        let keys: Vec<(&str, bool)> = todos.iter().map(|t| (t.key.as_str(), t.done)).collect();
        assert_eq!(
            keys,
            vec![
                ("love_body_todo", true),
                ("steady_mind_todo", false),
                ("steady_body_todo", false),
            ]
        );
        assert_eq!(todos[2].date, day("2026-02-20"));
        assert_eq!(todos[2].content, "早睡");
    }

    #[test]
    fn test_todo_key_helpers() {
        assert!(is_todo_key("love_mind_todo"));
        assert!(!is_todo_key("mood"));
        assert_eq!(done_key("love_mind_todo"), "love_mind_todo_done");
    }
}
