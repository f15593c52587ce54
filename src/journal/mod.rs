//! Daily journal entries, saved reports and the analytics built on them.

pub mod analytics;
pub mod service;

pub use analytics::{JournalStats, SearchHit, TodoItem};
pub use service::JournalService;
