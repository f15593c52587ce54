//! Generative AI Provider Abstraction
//!
//! Two seams, both injected into the analysis orchestrator:
//!
//! - [`DocumentIngestion`]: turns a local document into a remote handle the
//!   model can read, and deletes it again
//! - [`StreamingGenerator`]: opens one streamed generation over remote
//!   documents plus a text prompt
//!
//! Neither trait retries. A failed call is reported to the caller as is.

mod gemini;
mod sse;

pub use gemini::GeminiClient;
pub use sse::SseDecoder;

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, UpstreamError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::GenAiConfig;
use crate::types::{GuanxinError, Result};

/// Reassembled document ready for ingestion. Held in memory only.
#[derive(Clone)]
pub struct LocalDocument {
    pub display_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl std::fmt::Debug for LocalDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDocument")
            .field("display_name", &self.display_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Handle to a document stored by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    /// Resource name used for deletion (e.g. `files/abc123`)
    pub name: String,
    /// URI referenced from generation requests
    pub uri: String,
    pub mime_type: String,
}

/// One generation call: every document plus the prompt, in that order
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub documents: Vec<RemoteDocument>,
    pub prompt: String,
}

/// Stream of generated text fragments in arrival order
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Shared ingestion client for concurrent handlers.
pub type SharedIngestion = Arc<dyn DocumentIngestion>;

/// Shared generator for concurrent handlers.
pub type SharedGenerator = Arc<dyn StreamingGenerator>;

#[async_trait]
pub trait DocumentIngestion: Send + Sync {
    /// Upload a document, returning its remote handle
    async fn upload(&self, document: LocalDocument) -> Result<RemoteDocument>;

    /// Delete a previously uploaded document
    async fn delete(&self, document: &RemoteDocument) -> Result<()>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

#[async_trait]
pub trait StreamingGenerator: Send + Sync {
    /// Open a streamed generation.
    ///
    /// An error here means the stream never started. Errors after the first
    /// fragment arrive as `Err` items of the stream.
    async fn generate_stream(&self, request: GenerationRequest) -> Result<TextStream>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Create the ingestion and generation clients from configuration
pub fn create_provider(config: &GenAiConfig) -> Result<(SharedIngestion, SharedGenerator)> {
    match config.provider.as_str() {
        "gemini" => {
            let client = Arc::new(GeminiClient::new(config)?);
            Ok((client.clone(), client))
        }
        _ => Err(GuanxinError::Config(format!(
            "Unknown provider: {}. Supported: gemini",
            config.provider
        ))),
    }
}
