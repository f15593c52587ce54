//! Filesystem chunk store
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<session>/file<N>.meta          {"mimeType": "...", "chunkCount": K}
//! <root>/<session>/file<N>.part<I>       base64 text of chunk I
//! <root>/<session>.claimed/...           same content, owned by a finalize call
//! ```
//!
//! Chunks are written to a unique temporary name and renamed into place, so a
//! half-written chunk is never listed as received.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use super::ChunkStore;
use crate::constants::upload::CLAIMED_SUFFIX;
use crate::types::{
    ChunkUpload, FileManifest, FileMeta, GuanxinError, Result, ResultExt, SessionId,
};

#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

/// Entry kinds recognised inside a session directory
#[derive(Debug, PartialEq, Eq)]
enum SessionEntry {
    Meta { file_index: u32 },
    Part { file_index: u32, chunk_index: u32 },
}

impl SessionEntry {
    fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("file")?;
        if let Some(index) = rest.strip_suffix(".meta") {
            return Some(Self::Meta {
                file_index: index.parse().ok()?,
            });
        }
        let (file, chunk) = rest.split_once(".part")?;
        Some(Self::Part {
            file_index: file.parse().ok()?,
            chunk_index: chunk.parse().ok()?,
        })
    }
}

impl FsChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn claimed_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root
            .join(format!("{}{}", session_id.as_str(), CLAIMED_SUFFIX))
    }

    fn meta_name(file_index: u32) -> String {
        format!("file{}.meta", file_index)
    }

    fn part_name(file_index: u32, chunk_index: u32) -> String {
        format!("file{}.part{}", file_index, chunk_index)
    }

    /// Write through a temporary file so readers only see complete chunks.
    async fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> Result<()> {
        let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        fs::write(&tmp, contents)
            .await
            .with_context_fn(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, dir.join(name)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(GuanxinError::Storage(format!(
                "Failed to move {} into place: {}",
                name, e
            )));
        }
        Ok(())
    }

    async fn claimed_exists(&self, session_id: &SessionId) -> bool {
        fs::try_exists(self.claimed_dir(session_id))
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put_chunk(&self, upload: &ChunkUpload) -> Result<()> {
        let dir = self.session_dir(&upload.session_id);
        fs::create_dir_all(&dir)
            .await
            .with_context_fn(|| format!("Failed to create session dir {}", dir.display()))?;

        Self::write_atomic(
            &dir,
            &Self::part_name(upload.file_index, upload.chunk_index),
            upload.data.as_bytes(),
        )
        .await?;

        if upload.chunk_index == 0 {
            let meta = FileMeta {
                mime_type: upload.mime_type.clone(),
                chunk_count: upload.chunk_count,
            };
            let json = serde_json::to_vec(&meta)?;
            Self::write_atomic(&dir, &Self::meta_name(upload.file_index), &json).await?;
        }

        debug!(
            session = %upload.session_id,
            file = upload.file_index,
            chunk = upload.chunk_index,
            "Stored chunk"
        );
        Ok(())
    }

    async fn claim(&self, session_id: &SessionId) -> Result<()> {
        match fs::rename(self.session_dir(session_id), self.claimed_dir(session_id)).await {
            Ok(()) => {
                debug!(session = %session_id, "Claimed session");
                Ok(())
            }
            Err(_) if self.claimed_exists(session_id).await => {
                Err(GuanxinError::SessionBusy(session_id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(GuanxinError::SessionNotFound(session_id.to_string()))
            }
            Err(e) => Err(GuanxinError::Io(e)),
        }
    }

    async fn list_files(&self, session_id: &SessionId) -> Result<Vec<FileManifest>> {
        let dir = self.claimed_dir(session_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GuanxinError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => return Err(GuanxinError::Io(e)),
        };

        let mut files: BTreeMap<u32, FileManifest> = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(parsed) = name.to_str().and_then(SessionEntry::parse) else {
                continue;
            };
            match parsed {
                SessionEntry::Meta { file_index } => {
                    let raw = fs::read(entry.path()).await?;
                    let meta: FileMeta = serde_json::from_slice(&raw).with_context_fn(|| {
                        format!("Corrupted metadata for file {} in {}", file_index, session_id)
                    })?;
                    manifest_for(&mut files, file_index).meta = Some(meta);
                }
                SessionEntry::Part {
                    file_index,
                    chunk_index,
                } => {
                    manifest_for(&mut files, file_index)
                        .received
                        .insert(chunk_index);
                }
            }
        }

        Ok(files.into_values().collect())
    }

    async fn read_file(
        &self,
        session_id: &SessionId,
        file_index: u32,
        chunk_count: u32,
    ) -> Result<String> {
        let dir = self.claimed_dir(session_id);
        let mut content = String::new();
        for chunk_index in 0..chunk_count {
            let path = dir.join(Self::part_name(file_index, chunk_index));
            let part = fs::read_to_string(&path)
                .await
                .with_context_fn(|| format!("Failed to read {}", path.display()))?;
            content.push_str(&part);
        }
        Ok(content)
    }

    async fn remove(&self, session_id: &SessionId) -> Result<()> {
        match fs::remove_dir_all(self.claimed_dir(session_id)).await {
            Ok(()) => {
                debug!(session = %session_id, "Removed local session data");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuanxinError::Io(e)),
        }
    }

    async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(GuanxinError::Io(e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            info!("Swept {} stale upload session(s)", removed);
        }
        Ok(removed)
    }

    fn name(&self) -> &str {
        "fs"
    }
}

fn manifest_for(files: &mut BTreeMap<u32, FileManifest>, file_index: u32) -> &mut FileManifest {
    files.entry(file_index).or_insert_with(|| FileManifest {
        file_index,
        meta: None,
        received: Default::default(),
    })
}
