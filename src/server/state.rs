//! Shared handler state

use axum::http::HeaderName;
use std::sync::Arc;

use crate::ai::{SharedGenerator, SharedIngestion, TimeoutConfig, create_provider};
use crate::analysis::{AnalysisOrchestrator, UploadReceiver};
use crate::config::Config;
use crate::journal::JournalService;
use crate::storage::{Database, FsChunkStore, SharedChunkStore, SharedDatabase};
use crate::types::{GuanxinError, Result};

/// Application state handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub receiver: UploadReceiver,
    pub orchestrator: AnalysisOrchestrator,
    pub journal: JournalService,
    pub store: SharedChunkStore,
    pub user_header: HeaderName,
}

impl AppState {
    /// Wire the state from already-built collaborators
    pub fn new(
        config: &Config,
        store: SharedChunkStore,
        ingestion: SharedIngestion,
        generator: SharedGenerator,
        db: SharedDatabase,
    ) -> Result<Self> {
        let user_header = HeaderName::try_from(config.auth.user_header.to_ascii_lowercase())
            .map_err(|e| {
                GuanxinError::Config(format!(
                    "auth.user_header is not a valid header name: {}",
                    e
                ))
            })?;

        Ok(Self {
            receiver: UploadReceiver::new(store.clone()),
            orchestrator: AnalysisOrchestrator::new(
                store.clone(),
                ingestion,
                generator,
                TimeoutConfig::from(&config.genai),
            ),
            journal: JournalService::new(db, config.journal.clone()),
            store,
            user_header,
        })
    }

    /// Production wiring: filesystem chunk store, SQLite journal, configured provider
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: SharedChunkStore = Arc::new(FsChunkStore::new(&config.upload.root_dir));
        let (ingestion, generator) = create_provider(&config.genai)?;
        let db = Arc::new(Database::open(&config.journal.database_path)?);
        Self::new(config, store, ingestion, generator, db)
    }
}
