//! Chunk Store
//!
//! Session-scoped storage for base64 chunk fragments and per-file metadata.
//!
//! A session moves through two states:
//! - **active**: accepts `put_chunk` writes
//! - **claimed**: owned by exactly one finalize call; `list_files`,
//!   `read_file` and `remove` operate on claimed sessions only
//!
//! `claim` is the only transition and is atomic, so two finalize calls for the
//! same session can never both read it.

mod fs;
mod memory;

pub use fs::FsChunkStore;
pub use memory::MemoryChunkStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{ChunkUpload, FileManifest, Result, SessionId};

/// Shared chunk store for concurrent handlers.
pub type SharedChunkStore = Arc<dyn ChunkStore>;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist one chunk, creating the session if needed.
    ///
    /// Writes metadata when `chunk_index == 0`. A second write to the same
    /// `(file_index, chunk_index)` replaces the first.
    async fn put_chunk(&self, upload: &ChunkUpload) -> Result<()>;

    /// Take exclusive ownership of an active session.
    ///
    /// Fails with `SessionNotFound` when no such session exists and with
    /// `SessionBusy` when another caller already claimed it.
    async fn claim(&self, session_id: &SessionId) -> Result<()>;

    /// Manifests of every file in a claimed session, ordered by file index.
    ///
    /// Fails with `SessionNotFound` when the session is not claimed.
    async fn list_files(&self, session_id: &SessionId) -> Result<Vec<FileManifest>>;

    /// Concatenation of chunks `0..chunk_count` of one file of a claimed session.
    async fn read_file(
        &self,
        session_id: &SessionId,
        file_index: u32,
        chunk_count: u32,
    ) -> Result<String>;

    /// Delete a claimed session. Removing a missing session is not an error.
    async fn remove(&self, session_id: &SessionId) -> Result<()>;

    /// Delete sessions (active or claimed) untouched for longer than `max_age`.
    /// Returns how many were removed.
    async fn sweep_stale(&self, max_age: Duration) -> Result<usize>;

    /// Store name for logging
    fn name(&self) -> &str;
}
