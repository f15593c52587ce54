//! AI Integration Layer
//!
//! Document ingestion and streamed report generation, plus the prompt that
//! drives the journal analysis.

pub mod prompt;
pub mod provider;
pub mod timeout;

pub use prompt::{PromptBuilder, PromptSection, PromptTemplates};
pub use provider::{
    DocumentIngestion, GeminiClient, GenerationRequest, LocalDocument, RemoteDocument,
    SharedGenerator, SharedIngestion, StreamingGenerator, TextStream, create_provider,
};
pub use timeout::{TimeoutConfig, with_timeout};
