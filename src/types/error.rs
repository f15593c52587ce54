//! Unified Error Type System
//!
//! Centralized error types for the entire service.
//! Every variant maps to exactly one HTTP status so handlers never decide
//! status codes on their own.
//!
//! ## Upstream Error Categories
//!
//! - **RateLimit**: API rate limiting
//! - **Auth**: Authentication failures (bad or missing API key)
//! - **Network**: Connectivity issues
//! - **Unavailable**: Model or file not found upstream
//! - **Transient**: Temporary server issues
//!
//! Categories are logged as hints only. The analysis pipeline never retries
//! an upstream call on its own.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Upstream error categories used for logging and client hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited by the provider
    RateLimit,
    /// Authentication failed
    Auth,
    /// Network/connectivity issues
    Network,
    /// Resource or model unavailable
    Unavailable,
    /// Request rejected as invalid
    BadRequest,
    /// Response body could not be parsed
    ParseError,
    /// Temporary server issues
    Transient,
    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Whether a client could reasonably try the same request again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network | Self::Transient)
    }
}

// =============================================================================
// Upstream Error
// =============================================================================

/// Error returned by the document ingestion or generation API
#[derive(Debug, Clone)]
pub struct UpstreamError {
    /// Error category
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// HTTP status reported by the provider, if any
    pub status: Option<u16>,
    /// Suggested wait time before retry
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for UpstreamError {}

impl UpstreamError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            status: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Self::new(category, message)
        }
    }

    /// Attach the upstream HTTP status
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto categories
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify HTTP status code returned by a provider
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> UpstreamError {
        let err = match status {
            429 => UpstreamError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => UpstreamError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 413 | 422 => {
                UpstreamError::with_provider(ErrorCategory::BadRequest, message, provider)
            }
            500 | 502 | 503 | 504 => {
                UpstreamError::with_provider(ErrorCategory::Transient, message, provider)
                    .retry_after(Duration::from_secs(5))
            }
            404 => UpstreamError::with_provider(ErrorCategory::Unavailable, message, provider),
            _ => UpstreamError::with_provider(ErrorCategory::Unknown, message, provider),
        };
        err.status(status)
    }

    /// Classify a transport-level failure from the HTTP client
    pub fn classify_transport(err: &reqwest::Error, provider: &str) -> UpstreamError {
        let category = if err.is_timeout() || err.is_connect() {
            ErrorCategory::Network
        } else if err.is_decode() || err.is_body() {
            ErrorCategory::ParseError
        } else {
            ErrorCategory::Unknown
        };
        UpstreamError::with_provider(category, err.to_string(), provider)
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum GuanxinError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Upload Session Errors
    // -------------------------------------------------------------------------
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// The session directory is gone: never uploaded, already finalized, or swept
    #[error("找不到該上傳區塊。可能已被清除或上傳失敗。")]
    SessionNotFound(String),

    #[error("Session {0} is already being analyzed")]
    SessionBusy(String),

    #[error("Session {0} contains no files")]
    EmptySession(String),

    #[error("Upload incomplete for file {file_index} in session {session_id}: missing chunks {missing:?}")]
    IncompleteUpload {
        session_id: String,
        file_index: u32,
        missing: Vec<u32>,
    },

    #[error("File {file_index} is not valid base64: {message}")]
    Decode { file_index: u32, message: String },

    // -------------------------------------------------------------------------
    // Upstream Errors
    // -------------------------------------------------------------------------
    #[error("Upstream error: {0}")]
    Upstream(UpstreamError),

    #[error("Stream error: {0}")]
    Stream(String),

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Internal Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<UpstreamError> for GuanxinError {
    fn from(err: UpstreamError) -> Self {
        GuanxinError::Upstream(err)
    }
}

impl From<r2d2::Error> for GuanxinError {
    fn from(err: r2d2::Error) -> Self {
        GuanxinError::Storage(format!("Connection pool error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, GuanxinError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl GuanxinError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an upstream error from message and category
    pub fn upstream(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::Upstream(UpstreamError::new(category, message))
    }

    /// HTTP status code this error is reported with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidSessionId(_)
            | Self::SessionNotFound(_)
            | Self::EmptySession(_)
            | Self::IncompleteUpload { .. }
            | Self::Decode { .. }
            | Self::BadRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::SessionBusy(_) => 409,
            Self::Upstream(_) => 502,
            Self::Timeout { .. } => 504,
            Self::Io(_)
            | Self::Database(_)
            | Self::Json(_)
            | Self::Stream(_)
            | Self::Config(_)
            | Self::Storage(_) => 500,
        }
    }

    /// Whether the error was caused by the client request
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| GuanxinError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| GuanxinError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
