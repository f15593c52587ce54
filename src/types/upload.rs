//! Upload domain types shared by the chunk stores, the receiver and the
//! orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::SessionId;
use crate::constants::upload::DEFAULT_MIME_TYPE;

pub fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

/// One base64 fragment of one file, as posted by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUpload {
    pub session_id: SessionId,
    pub file_index: u32,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub chunk_index: u32,
    pub chunk_count: u32,
    /// Base64 text, opaque until reassembly
    pub data: String,
}

/// Metadata recorded when chunk 0 of a file arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub mime_type: String,
    pub chunk_count: u32,
}

/// What the store holds for one file of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifest {
    pub file_index: u32,
    /// Absent until chunk 0 has been received
    pub meta: Option<FileMeta>,
    pub received: BTreeSet<u32>,
}

impl FileManifest {
    /// Chunk indices in `0..chunk_count` that were never received.
    ///
    /// Without metadata the chunk count is unknown, so index 0 is reported
    /// missing.
    pub fn missing_chunks(&self) -> Vec<u32> {
        match &self.meta {
            Some(meta) => (0..meta.chunk_count)
                .filter(|i| !self.received.contains(i))
                .collect(),
            None => vec![0],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_chunks().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(meta: Option<u32>, received: &[u32]) -> FileManifest {
        FileManifest {
            file_index: 0,
            meta: meta.map(|chunk_count| FileMeta {
                mime_type: DEFAULT_MIME_TYPE.to_string(),
                chunk_count,
            }),
            received: received.iter().copied().collect(),
        }
    }

    #[test]
    fn test_complete_manifest() {
        assert!(manifest(Some(3), &[2, 0, 1]).is_complete());
    }

    #[test]
    fn test_missing_chunks_reported_in_order() {
        assert_eq!(manifest(Some(4), &[0, 2]).missing_chunks(), vec![1, 3]);
    }

    #[test]
    fn test_extra_chunks_do_not_matter() {
        assert!(manifest(Some(2), &[0, 1, 7]).is_complete());
    }

    #[test]
    fn test_no_meta_is_incomplete() {
        assert_eq!(manifest(None, &[1, 2]).missing_chunks(), vec![0]);
    }

    #[test]
    fn test_chunk_upload_defaults_mime() {
        let json = r#"{"sessionId":"s-1","fileIndex":0,"chunkIndex":0,"chunkCount":1,"data":"QQ=="}"#;
        let upload: ChunkUpload = serde_json::from_str(json).unwrap();
        assert_eq!(upload.mime_type, "application/pdf");
        assert_eq!(upload.session_id.as_str(), "s-1");
    }
}
