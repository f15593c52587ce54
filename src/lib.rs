//! guanxin - 觀心書 journaling backend
//!
//! Receives journal documents as base64 chunks, reassembles them on demand
//! and streams a reflective analysis report from a generative model back to
//! the caller. Daily entries, saved reports and simple analytics live in a
//! per-user SQLite store.
//!
//! ## Modules
//!
//! - [`analysis`]: upload receiver, finalize orchestration, stream relay
//! - [`ai`]: document ingestion and streaming generation providers, prompt
//! - [`storage`]: chunk stores (filesystem, memory) and the journal database
//! - [`journal`]: journal service and analytics
//! - [`server`]: axum routes, auth extractor, error mapping
//! - [`config`]: layered configuration

pub mod ai;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod constants;
pub mod journal;
pub mod server;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader};
pub use types::error::{ErrorCategory, GuanxinError, Result, ResultExt};

pub use storage::{
    ChunkStore, Database, FsChunkStore, MemoryChunkStore, PoolConfig, SharedChunkStore,
    SharedDatabase,
};

pub use analysis::{AnalysisOrchestrator, FinalizeRequest, ReportStream, UploadReceiver};

pub use ai::{
    DocumentIngestion, GeminiClient, SharedGenerator, SharedIngestion, StreamingGenerator,
    TimeoutConfig, with_timeout,
};

pub use journal::JournalService;
pub use server::{AppState, router, serve};
