//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/guanxin/) and project (./guanxin.toml) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{genai, journal, server, upload};
use crate::types::{GuanxinError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Chunked upload storage settings
    pub upload: UploadConfig,

    /// Generative AI provider settings
    pub genai: GenAiConfig,

    /// Journal store and analytics settings
    pub journal: JournalConfig,

    /// Identity gateway settings
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            genai: GenAiConfig::default(),
            journal: JournalConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `GuanxinError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(GuanxinError::Config(format!(
                "server.bind_addr is not a socket address: {}",
                self.server.bind_addr
            )));
        }

        if self.server.max_body_bytes == 0 {
            return Err(GuanxinError::Config(
                "server.max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.genai.temperature) {
            return Err(GuanxinError::Config(format!(
                "genai.temperature must be between 0.0 and 2.0, got {}",
                self.genai.temperature
            )));
        }

        if self.genai.timeout_secs == 0 || self.genai.generation_timeout_secs == 0 {
            return Err(GuanxinError::Config(
                "genai timeouts must be greater than 0".to_string(),
            ));
        }

        if self.upload.session_ttl_secs == 0 || self.upload.sweep_interval_secs == 0 {
            return Err(GuanxinError::Config(
                "upload.session_ttl_secs and upload.sweep_interval_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.journal.missing_window_days < 1 {
            return Err(GuanxinError::Config(
                "journal.missing_window_days must be at least 1".to_string(),
            ));
        }

        if self.auth.user_header.trim().is_empty() {
            return Err(GuanxinError::Config(
                "auth.user_header must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,

    /// Maximum request body size in bytes
    pub max_body_bytes: usize,

    /// Allow any origin (browser client served elsewhere)
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: server::DEFAULT_BIND_ADDR.to_string(),
            max_body_bytes: server::DEFAULT_MAX_BODY_BYTES,
            cors_permissive: true,
        }
    }
}

// =============================================================================
// Upload Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Root directory holding one subdirectory per session
    pub root_dir: PathBuf,

    /// Sessions older than this are swept (seconds)
    pub session_ttl_secs: u64,

    /// How often the background sweeper runs (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join(upload::ROOT_DIR_NAME),
            session_ttl_secs: upload::DEFAULT_SESSION_TTL_SECS,
            sweep_interval_secs: upload::DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// =============================================================================
// Generative AI Configuration
// =============================================================================

/// Provider settings
///
/// The API key is never serialized and is redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenAiConfig {
    /// Provider name ("gemini")
    pub provider: String,

    /// Generation model
    pub model: String,

    /// API key, falls back to GEMINI_API_KEY
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// API base URL (for proxies and tests)
    pub api_base: Option<String>,

    /// Timeout for document upload and delete requests (seconds)
    pub timeout_secs: u64,

    /// Upper bound for one streamed generation (seconds)
    pub generation_timeout_secs: u64,

    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl std::fmt::Debug for GenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAiConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("generation_timeout_secs", &self.generation_timeout_secs)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            provider: genai::DEFAULT_PROVIDER.to_string(),
            model: genai::DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: None,
            timeout_secs: genai::DEFAULT_TIMEOUT_SECS,
            generation_timeout_secs: genai::DEFAULT_GENERATION_TIMEOUT_SECS,
            temperature: 1.0,
        }
    }
}

impl GenAiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

// =============================================================================
// Journal Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Number of recent entries scanned for to-dos
    pub recent_todo_entries: usize,

    /// Days a completed to-do stays visible
    pub todo_done_grace_days: i64,

    /// Days scanned for missing entries
    pub missing_window_days: i64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(journal::DEFAULT_DATABASE_PATH),
            recent_todo_entries: journal::RECENT_TODO_ENTRIES,
            todo_done_grace_days: journal::TODO_DONE_GRACE_DAYS,
            missing_window_days: journal::MISSING_WINDOW_DAYS,
        }
    }
}

// =============================================================================
// Auth Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trusted header holding the user id set by the identity gateway
    pub user_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: server::DEFAULT_USER_HEADER.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
