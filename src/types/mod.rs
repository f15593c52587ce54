pub mod error;
pub mod journal;
pub mod upload;

pub use error::{ErrorCategory, ErrorClassifier, GuanxinError, Result, ResultExt, UpstreamError};
pub use journal::{JournalEntry, ReportSummary, SavedReport};
pub use upload::{ChunkUpload, FileManifest, FileMeta, default_mime_type};

// =============================================================================
// Domain Newtypes
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::upload::MAX_SESSION_ID_LEN;

/// Type-safe wrapper for upload session IDs
///
/// Only `[A-Za-z0-9_-]` is accepted so an id can always be used as a single
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if id.is_empty() || id.len() > MAX_SESSION_ID_LEN || !valid_chars {
            return Err(GuanxinError::InvalidSessionId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = GuanxinError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque user identifier forwarded by the identity gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
