//! Journal analysis pipeline
//!
//! Chunked uploads land in a [`ChunkStore`](crate::storage::ChunkStore); a
//! finalize call reassembles them, hands them to the document ingestion API
//! and relays the streamed report back to the caller.

pub mod orchestrator;
pub mod relay;
pub mod upload;

pub use orchestrator::{AnalysisOrchestrator, FinalizeRequest, decode_document};
pub use relay::{RemoteCleanup, ReportStream, relay};
pub use upload::UploadReceiver;
