//! Upload Receiver
//!
//! Accepts one chunk per call. Ordering, duplicates and gaps are all
//! tolerated here; completeness is only judged when the session is finalized.

use tracing::{debug, instrument};

use crate::storage::SharedChunkStore;
use crate::types::{ChunkUpload, GuanxinError, Result};

#[derive(Clone)]
pub struct UploadReceiver {
    store: SharedChunkStore,
}

impl UploadReceiver {
    pub fn new(store: SharedChunkStore) -> Self {
        Self { store }
    }

    /// Persist one chunk. Chunk 0 also records the file's metadata.
    #[instrument(skip_all, fields(session = %upload.session_id, file = upload.file_index, chunk = upload.chunk_index))]
    pub async fn receive(&self, upload: &ChunkUpload) -> Result<()> {
        if upload.chunk_count == 0 {
            return Err(GuanxinError::BadRequest(
                "chunkCount must be at least 1".to_string(),
            ));
        }

        self.store.put_chunk(upload).await?;
        debug!(
            "Received chunk {}/{} ({} bytes)",
            upload.chunk_index + 1,
            upload.chunk_count,
            upload.data.len()
        );
        Ok(())
    }
}
