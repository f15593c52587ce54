//! Analysis Orchestrator
//!
//! Turns a completed upload session into one streamed report:
//!
//! ```text
//! claim ─► validate manifests ─► reassemble + ingest each file ─► remove local
//!                                                                     │
//!          relay (remote cleanup at end) ◄─ open generation ◄─ prompt ◄┘
//! ```
//!
//! Local chunks are removed before generation starts on every path past the
//! claim. Remote documents are owned by a [`RemoteCleanup`] from the moment
//! they are created.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::relay::{RemoteCleanup, ReportStream, relay};
use crate::ai::{
    GenerationRequest, LocalDocument, PromptTemplates, SharedGenerator, SharedIngestion,
    TimeoutConfig, with_timeout,
};
use crate::constants::genai::DOCUMENT_DISPLAY_NAME;
use crate::storage::SharedChunkStore;
use crate::types::{FileManifest, GuanxinError, Result, SessionId};

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub session_id: SessionId,
    /// Report text from an earlier period. Blank text counts as absent.
    pub previous_report: Option<String>,
}

#[derive(Clone)]
pub struct AnalysisOrchestrator {
    store: SharedChunkStore,
    ingestion: SharedIngestion,
    generator: SharedGenerator,
    timeouts: TimeoutConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: SharedChunkStore,
        ingestion: SharedIngestion,
        generator: SharedGenerator,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            store,
            ingestion,
            generator,
            timeouts,
        }
    }

    /// Claim the session and start streaming its analysis.
    ///
    /// Errors returned here happen before any report byte exists, so the
    /// caller can still answer with a JSON error.
    #[instrument(skip_all, fields(session = %request.session_id))]
    pub async fn finalize(&self, request: FinalizeRequest) -> Result<ReportStream> {
        let session_id = request.session_id;
        self.store.claim(&session_id).await?;
        info!("Claimed upload session via {}", self.store.name());

        let mut cleanup = RemoteCleanup::new(self.ingestion.clone());
        let ingested = self.ingest_session(&session_id, &mut cleanup).await;

        if let Err(e) = self.store.remove(&session_id).await {
            warn!("Failed to remove local chunks for {}: {}", session_id, e);
        }

        let documents = match ingested {
            Ok(documents) => documents,
            Err(e) => {
                cleanup.run().await;
                return Err(e);
            }
        };

        let prompt = PromptTemplates::journal_analysis(request.previous_report.as_deref()).build();
        debug!(
            "Opening generation with {} document(s), prompt {} chars",
            documents.len(),
            prompt.chars().count()
        );

        let opened = with_timeout(
            self.timeouts.request,
            self.generator
                .generate_stream(GenerationRequest { documents, prompt }),
            "generation request",
        )
        .await;

        match opened {
            Ok(stream) => {
                info!(
                    "Streaming report from {} ({})",
                    self.generator.name(),
                    self.generator.model()
                );
                Ok(relay(stream, cleanup, self.timeouts.generation))
            }
            Err(e) => {
                if let GuanxinError::Upstream(ref upstream) = e {
                    warn!(
                        "Generation request rejected (retryable: {}): {}",
                        upstream.is_retryable(),
                        upstream
                    );
                }
                cleanup.run().await;
                Err(e)
            }
        }
    }

    /// Validate every manifest, then reassemble and upload each file in order.
    async fn ingest_session(
        &self,
        session_id: &SessionId,
        cleanup: &mut RemoteCleanup,
    ) -> Result<Vec<crate::ai::RemoteDocument>> {
        let manifests = self.store.list_files(session_id).await?;
        if manifests.is_empty() {
            return Err(GuanxinError::EmptySession(session_id.to_string()));
        }
        check_complete(session_id, &manifests)?;

        let mut documents = Vec::with_capacity(manifests.len());
        for manifest in &manifests {
            let Some(meta) = &manifest.meta else {
                continue;
            };

            let encoded = self
                .store
                .read_file(session_id, manifest.file_index, meta.chunk_count)
                .await?;
            let bytes = decode_document(manifest.file_index, &encoded)?;
            debug!(
                "File {} reassembled: {} chunk(s), {} bytes",
                manifest.file_index,
                meta.chunk_count,
                bytes.len()
            );

            let document = self
                .ingestion
                .upload(LocalDocument {
                    display_name: format!("{}-{}", DOCUMENT_DISPLAY_NAME, manifest.file_index),
                    mime_type: meta.mime_type.clone(),
                    bytes,
                })
                .await?;
            cleanup.track(document.clone());
            documents.push(document);
        }

        Ok(documents)
    }
}

fn check_complete(session_id: &SessionId, manifests: &[FileManifest]) -> Result<()> {
    for manifest in manifests {
        let missing = manifest.missing_chunks();
        if !missing.is_empty() {
            return Err(GuanxinError::IncompleteUpload {
                session_id: session_id.to_string(),
                file_index: manifest.file_index,
                missing,
            });
        }
    }
    Ok(())
}

/// Decode concatenated base64 chunk text. Line breaks between chunks are ignored.
pub fn decode_document(file_index: u32, encoded: &str) -> Result<Bytes> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map(Bytes::from)
        .map_err(|e| GuanxinError::Decode {
            file_index,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{DocumentIngestion, RemoteDocument, StreamingGenerator, TextStream};
    use crate::storage::chunk_store::test_support::{chunk, session};
    use crate::storage::{ChunkStore, FsChunkStore, MemoryChunkStore, SharedChunkStore};
    use crate::types::{ErrorCategory, UpstreamError};
    use async_trait::async_trait;
    use futures::StreamExt;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinSet;

    #[derive(Default)]
    struct MockIngestion {
        uploads: Mutex<Vec<LocalDocument>>,
        deletes: AtomicUsize,
        fail_upload_at: Option<usize>,
    }

    #[async_trait]
    impl DocumentIngestion for MockIngestion {
        async fn upload(&self, document: LocalDocument) -> Result<RemoteDocument> {
            let mut uploads = self.uploads.lock().unwrap();
            if self.fail_upload_at == Some(uploads.len()) {
                return Err(UpstreamError::new(ErrorCategory::Unavailable, "files api down").into());
            }
            let n = uploads.len();
            uploads.push(document);
            Ok(RemoteDocument {
                name: format!("files/doc-{}", n),
                uri: format!("https://files.test/doc-{}", n),
                mime_type: "application/pdf".to_string(),
            })
        }

        async fn delete(&self, _document: &RemoteDocument) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct MockGenerator {
        requests: Mutex<Vec<GenerationRequest>>,
        fail_open: bool,
    }

    #[async_trait]
    impl StreamingGenerator for MockGenerator {
        async fn generate_stream(&self, request: GenerationRequest) -> Result<TextStream> {
            self.requests.lock().unwrap().push(request);
            if self.fail_open {
                return Err(UpstreamError::new(ErrorCategory::RateLimit, "quota").into());
            }
            Ok(Box::pin(futures::stream::iter(vec![
                Ok("## 摘要\n".to_string()),
                Ok("狀態穩定".to_string()),
            ])))
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }

    struct Harness {
        store: Arc<MemoryChunkStore>,
        ingestion: Arc<MockIngestion>,
        generator: Arc<MockGenerator>,
        orchestrator: AnalysisOrchestrator,
    }

    fn harness(ingestion: MockIngestion, generator: MockGenerator) -> Harness {
        let store = Arc::new(MemoryChunkStore::new());
        let ingestion = Arc::new(ingestion);
        let generator = Arc::new(generator);
        let orchestrator = AnalysisOrchestrator::new(
            store.clone(),
            ingestion.clone(),
            generator.clone(),
            TimeoutConfig::default(),
        );
        Harness {
            store,
            ingestion,
            generator,
            orchestrator,
        }
    }

    fn request(id: &str, previous: Option<&str>) -> FinalizeRequest {
        FinalizeRequest {
            session_id: session(id),
            previous_report: previous.map(str::to_string),
        }
    }

    async fn upload_text(store: &MemoryChunkStore, id: &str, file: u32, text: &[u8], parts: usize) {
        let encoded = STANDARD.encode(text);
        let size = encoded.len().div_ceil(parts).max(1);
        let pieces: Vec<&str> = encoded
            .as_bytes()
            .chunks(size)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();
        let count = pieces.len() as u32;
        for (i, piece) in pieces.iter().enumerate().rev() {
            store
                .put_chunk(&chunk(id, file, i as u32, count, piece))
                .await
                .unwrap();
        }
    }

    async fn collect_text(stream: ReportStream) -> String {
        let parts: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        parts
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    async fn wait_for_deletes(ingestion: &MockIngestion, expected: usize) {
        for _ in 0..100 {
            if ingestion.deletes.load(Ordering::SeqCst) >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_finalize_streams_and_cleans_up() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        upload_text(&h.store, "ok", 0, b"%PDF-1.4 first", 3).await;
        upload_text(&h.store, "ok", 1, b"%PDF-1.4 second", 2).await;

        let stream = h.orchestrator.finalize(request("ok", None)).await.unwrap();
        assert_eq!(h.store.session_count(), 0);

        assert_eq!(collect_text(stream).await, "## 摘要\n狀態穩定");
        wait_for_deletes(&h.ingestion, 2).await;
        assert_eq!(h.ingestion.deletes.load(Ordering::SeqCst), 2);

        let uploads = h.ingestion.uploads.lock().unwrap();
        assert_eq!(uploads[0].bytes.as_ref(), b"%PDF-1.4 first");
        assert_eq!(uploads[1].bytes.as_ref(), b"%PDF-1.4 second");
        assert_eq!(uploads[1].display_name, "journal-1");

        let requests = h.generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].documents.len(), 2);
        assert_eq!(requests[0].documents[0].name, "files/doc-0");
    }

    #[tokio::test]
    async fn test_missing_session_makes_no_upstream_calls() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        let err = h.orchestrator.finalize(request("ghost", None)).await.err().unwrap();

        assert!(matches!(err, GuanxinError::SessionNotFound(_)));
        assert_eq!(err.status_code(), 400);
        assert!(h.ingestion.uploads.lock().unwrap().is_empty());
        assert!(h.generator.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_upload_detected_before_ingestion() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        upload_text(&h.store, "gap", 0, b"complete file", 1).await;
        h.store.put_chunk(&chunk("gap", 1, 0, 3, "QUJD")).await.unwrap();
        h.store.put_chunk(&chunk("gap", 1, 2, 3, "QUJD")).await.unwrap();

        let err = h.orchestrator.finalize(request("gap", None)).await.err().unwrap();
        match err {
            GuanxinError::IncompleteUpload {
                file_index, missing, ..
            } => {
                assert_eq!(file_index, 1);
                assert_eq!(missing, vec![1]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.ingestion.uploads.lock().unwrap().is_empty());
        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_base64_is_decode_error() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        h.store.put_chunk(&chunk("bad", 0, 0, 1, "not*base64")).await.unwrap();

        let err = h.orchestrator.finalize(request("bad", None)).await.err().unwrap();
        assert!(matches!(err, GuanxinError::Decode { file_index: 0, .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_upload_failure_cleans_up_earlier_documents() {
        let h = harness(
            MockIngestion {
                fail_upload_at: Some(1),
                ..Default::default()
            },
            MockGenerator::default(),
        );
        upload_text(&h.store, "half", 0, b"one", 1).await;
        upload_text(&h.store, "half", 1, b"two", 1).await;

        let err = h.orchestrator.finalize(request("half", None)).await.err().unwrap();
        assert_eq!(err.status_code(), 502);
        assert_eq!(h.ingestion.deletes.load(Ordering::SeqCst), 1);
        assert!(h.generator.requests.lock().unwrap().is_empty());
        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_generation_open_failure_cleans_up() {
        let h = harness(
            MockIngestion::default(),
            MockGenerator {
                fail_open: true,
                ..Default::default()
            },
        );
        upload_text(&h.store, "rl", 0, b"diary", 2).await;

        let err = h.orchestrator.finalize(request("rl", None)).await.err().unwrap();
        assert_eq!(err.status_code(), 502);
        assert_eq!(h.ingestion.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_stream_still_cleans_up() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        upload_text(&h.store, "gone", 0, b"diary", 1).await;

        let stream = h.orchestrator.finalize(request("gone", None)).await.unwrap();
        drop(stream);

        wait_for_deletes(&h.ingestion, 1).await;
        assert_eq!(h.ingestion.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_previous_report_reaches_prompt() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        upload_text(&h.store, "cmp", 0, b"diary", 1).await;

        let stream = h
            .orchestrator
            .finalize(request("cmp", Some("上次的報告內容")))
            .await
            .unwrap();
        collect_text(stream).await;

        let requests = h.generator.requests.lock().unwrap();
        let prompt = &requests[0].prompt;
        assert!(prompt.contains("上次的報告內容"));
        assert!(prompt.contains("### 4. 具體建議"));
    }

    #[tokio::test]
    async fn test_second_finalize_is_rejected() {
        let h = harness(MockIngestion::default(), MockGenerator::default());
        upload_text(&h.store, "twice", 0, b"diary", 1).await;

        let first = h.orchestrator.finalize(request("twice", None)).await;
        let second = h.orchestrator.finalize(request("twice", None)).await;

        assert!(first.is_ok());
        assert!(matches!(second.err().unwrap(), GuanxinError::SessionNotFound(_)));
        assert_eq!(h.ingestion.uploads.lock().unwrap().len(), 1);
    }

    async fn race_finalize(store: SharedChunkStore) {
        let ingestion = Arc::new(MockIngestion::default());
        let generator = Arc::new(MockGenerator::default());
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            store.clone(),
            ingestion.clone(),
            generator.clone(),
            TimeoutConfig::default(),
        ));
        store
            .put_chunk(&chunk("race", 0, 0, 1, &STANDARD.encode(b"diary")))
            .await
            .unwrap();

        let mut calls = JoinSet::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            calls.spawn(async move {
                let stream = orchestrator.finalize(request("race", None)).await?;
                Ok::<_, GuanxinError>(collect_text(stream).await)
            });
        }

        let mut reports = Vec::new();
        while let Some(result) = calls.join_next().await {
            match result.unwrap() {
                Ok(text) => reports.push(text),
                Err(GuanxinError::SessionBusy(_)) | Err(GuanxinError::SessionNotFound(_)) => {}
                Err(other) => panic!("unexpected finalize error: {other}"),
            }
        }

        assert_eq!(reports, vec!["## 摘要\n狀態穩定".to_string()]);
        assert_eq!(ingestion.uploads.lock().unwrap().len(), 1);
        assert_eq!(generator.requests.lock().unwrap().len(), 1);
        wait_for_deletes(&ingestion, 1).await;
        assert_eq!(ingestion.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finalize_memory_store() {
        race_finalize(Arc::new(MemoryChunkStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finalize_fs_store() {
        let temp = TempDir::new().unwrap();
        race_finalize(Arc::new(FsChunkStore::new(temp.path()))).await;
    }

    #[test]
    fn test_decode_ignores_line_breaks() {
        let bytes = decode_document(0, "QUJD\nREVG\r\n").unwrap();
        assert_eq!(bytes.as_ref(), b"ABCDEF");
    }

    proptest! {
        #[test]
        fn prop_reassembly_restores_bytes(
            payload in proptest::collection::vec(any::<u8>(), 1..2048),
            parts in 1usize..12,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let uploaded = runtime.block_on(async {
                let h = harness(MockIngestion::default(), MockGenerator::default());
                upload_text(&h.store, "prop", 0, &payload, parts).await;
                let stream = h.orchestrator.finalize(request("prop", None)).await.unwrap();
                collect_text(stream).await;
                let uploads = h.ingestion.uploads.lock().unwrap();
                uploads[0].bytes.to_vec()
            });
            prop_assert_eq!(uploaded, payload);
        }
    }
}
