//! In-memory chunk store for tests and single-process deployments

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::ChunkStore;
use crate::types::{ChunkUpload, FileManifest, FileMeta, GuanxinError, Result, SessionId};

#[derive(Debug, Default)]
struct FileData {
    meta: Option<FileMeta>,
    chunks: BTreeMap<u32, String>,
}

#[derive(Debug)]
struct SessionData {
    files: BTreeMap<u32, FileData>,
    touched: Instant,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            touched: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    active: DashMap<SessionId, SessionData>,
    claimed: DashMap<SessionId, SessionData>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held in either state
    pub fn session_count(&self) -> usize {
        self.active.len() + self.claimed.len()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put_chunk(&self, upload: &ChunkUpload) -> Result<()> {
        let mut session = self.active.entry(upload.session_id.clone()).or_default();
        session.touched = Instant::now();

        let file = session.files.entry(upload.file_index).or_default();
        file.chunks.insert(upload.chunk_index, upload.data.clone());
        if upload.chunk_index == 0 {
            file.meta = Some(FileMeta {
                mime_type: upload.mime_type.clone(),
                chunk_count: upload.chunk_count,
            });
        }
        Ok(())
    }

    async fn claim(&self, session_id: &SessionId) -> Result<()> {
        match self.active.remove(session_id) {
            Some((id, data)) => {
                self.claimed.insert(id, data);
                Ok(())
            }
            None if self.claimed.contains_key(session_id) => {
                Err(GuanxinError::SessionBusy(session_id.to_string()))
            }
            None => Err(GuanxinError::SessionNotFound(session_id.to_string())),
        }
    }

    async fn list_files(&self, session_id: &SessionId) -> Result<Vec<FileManifest>> {
        let session = self
            .claimed
            .get(session_id)
            .ok_or_else(|| GuanxinError::SessionNotFound(session_id.to_string()))?;

        Ok(session
            .files
            .iter()
            .map(|(&file_index, file)| FileManifest {
                file_index,
                meta: file.meta.clone(),
                received: file.chunks.keys().copied().collect(),
            })
            .collect())
    }

    async fn read_file(
        &self,
        session_id: &SessionId,
        file_index: u32,
        chunk_count: u32,
    ) -> Result<String> {
        let session = self
            .claimed
            .get(session_id)
            .ok_or_else(|| GuanxinError::SessionNotFound(session_id.to_string()))?;
        let file = session.files.get(&file_index).ok_or_else(|| {
            GuanxinError::Storage(format!("File {} missing from {}", file_index, session_id))
        })?;

        (0..chunk_count)
            .map(|i| {
                file.chunks.get(&i).map(String::as_str).ok_or_else(|| {
                    GuanxinError::Storage(format!(
                        "Chunk {} of file {} missing from {}",
                        i, file_index, session_id
                    ))
                })
            })
            .collect()
    }

    async fn remove(&self, session_id: &SessionId) -> Result<()> {
        self.claimed.remove(session_id);
        Ok(())
    }

    async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let before = self.session_count();
        self.active.retain(|_, s| s.touched.elapsed() <= max_age);
        self.claimed.retain(|_, s| s.touched.elapsed() <= max_age);
        Ok(before.saturating_sub(self.session_count()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunk_store::test_support::{
        chunk, exercise_concurrent_claims, exercise_concurrent_sessions, exercise_store, session,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_contract() {
        exercise_store(&MemoryChunkStore::new()).await;
    }

    #[tokio::test]
    async fn test_claim_states() {
        let store = MemoryChunkStore::new();
        assert!(matches!(
            store.claim(&session("m1")).await,
            Err(GuanxinError::SessionNotFound(_))
        ));

        store.put_chunk(&chunk("m1", 0, 0, 1, "QQ==")).await.unwrap();
        store.claim(&session("m1")).await.unwrap();
        assert!(matches!(
            store.claim(&session("m1")).await,
            Err(GuanxinError::SessionBusy(_))
        ));

        store.remove(&session("m1")).await.unwrap();
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryChunkStore::new());
        store.put_chunk(&chunk("race", 0, 0, 1, "QQ==")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim(&session("race")).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_through_trait_object() {
        exercise_concurrent_claims(Arc::new(MemoryChunkStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions() {
        exercise_concurrent_sessions(Arc::new(MemoryChunkStore::new())).await;
    }

    #[tokio::test]
    async fn test_sweep_stale() {
        let store = MemoryChunkStore::new();
        store.put_chunk(&chunk("s1", 0, 0, 1, "QQ==")).await.unwrap();
        assert_eq!(store.sweep_stale(Duration::from_secs(60)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.sweep_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.session_count(), 0);
    }
}
