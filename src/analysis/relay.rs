//! Stream Relay
//!
//! Forwards generated fragments to the response body as they arrive and owns
//! the deletion of remote documents for one analysis request.
//!
//! The body ends first and remote cleanup follows on a detached task:
//! - normal end of stream or upstream error: the relay hands the guard to
//!   [`RemoteCleanup::spawn`] before its last item
//! - client disconnect: the body is dropped mid-stream and the guard's `Drop`
//!   spawns the remaining deletions on the runtime

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ai::{RemoteDocument, SharedIngestion, TextStream};
use crate::types::{GuanxinError, Result};

/// Response body stream of UTF-8 report fragments
pub type ReportStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Owns remote documents until they are deleted.
///
/// A document leaves the guard only once its delete call has returned, so a
/// cancelled [`run`](Self::run) leaves it for `Drop` to retry.
pub struct RemoteCleanup {
    ingestion: SharedIngestion,
    documents: VecDeque<RemoteDocument>,
}

impl RemoteCleanup {
    pub fn new(ingestion: SharedIngestion) -> Self {
        Self {
            ingestion,
            documents: VecDeque::new(),
        }
    }

    pub fn track(&mut self, document: RemoteDocument) {
        self.documents.push_back(document);
    }

    /// Delete every tracked document. Failures are logged, never returned.
    pub async fn run(&mut self) {
        while let Some(document) = self.documents.front() {
            delete_logged(&self.ingestion, document).await;
            self.documents.pop_front();
        }
    }

    /// Run the deletions on a detached task.
    ///
    /// Returns `None` when there is nothing to delete or no runtime to spawn
    /// on; in the latter case the documents are logged and dropped.
    pub fn spawn(mut self) -> Option<JoinHandle<()>> {
        if self.documents.is_empty() {
            return None;
        }

        let documents = std::mem::take(&mut self.documents);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Scheduling cleanup of {} remote document(s)", documents.len());
                let mut detached = Self {
                    ingestion: self.ingestion.clone(),
                    documents,
                };
                Some(handle.spawn(async move { detached.run().await }))
            }
            Err(_) => {
                let names: Vec<_> = documents.iter().map(|d| d.name.as_str()).collect();
                warn!("No runtime available, remote documents left behind: {:?}", names);
                None
            }
        }
    }
}

impl Drop for RemoteCleanup {
    fn drop(&mut self) {
        if self.documents.is_empty() {
            return;
        }

        let remaining = Self {
            ingestion: self.ingestion.clone(),
            documents: std::mem::take(&mut self.documents),
        };
        remaining.spawn();
    }
}

async fn delete_logged(ingestion: &SharedIngestion, document: &RemoteDocument) {
    if let Err(e) = ingestion.delete(document).await {
        warn!(
            "Failed to delete remote document {} via {}: {}",
            document.name,
            ingestion.name(),
            e
        );
    }
}

/// Relay `upstream` into a body stream and schedule cleanup when it ends.
///
/// Empty fragments are skipped. Exceeding `deadline` ends the stream with a
/// `Timeout` error. The body never waits on remote deletions.
pub fn relay(upstream: TextStream, cleanup: RemoteCleanup, deadline: Duration) -> ReportStream {
    Box::pin(async_stream::stream! {
        let mut upstream = upstream;
        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut failure: Option<GuanxinError> = None;
        let mut fragments = 0usize;
        let mut bytes_sent = 0usize;

        loop {
            match tokio::time::timeout_at(deadline_at, upstream.next()).await {
                Ok(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    fragments += 1;
                    bytes_sent += text.len();
                    yield Ok(Bytes::from(text));
                }
                Ok(Some(Err(e))) => {
                    failure = Some(e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    failure = Some(GuanxinError::timeout("report generation", deadline));
                    break;
                }
            }
        }

        drop(upstream);
        cleanup.spawn();

        match failure {
            Some(e) => {
                warn!("Report stream failed after {} fragment(s): {}", fragments, e);
                yield Err(e);
            }
            None => info!("Report stream finished: {} fragment(s), {} bytes", fragments, bytes_sent),
        }
    })
}
