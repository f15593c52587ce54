//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Chunked upload constants
pub mod upload {
    /// Name of the directory created under the OS temp dir for upload sessions
    pub const ROOT_DIR_NAME: &str = "guanxinshu_uploads";

    /// MIME type assumed when the client does not send one
    pub const DEFAULT_MIME_TYPE: &str = "application/pdf";

    /// Longest session id accepted from a client
    pub const MAX_SESSION_ID_LEN: usize = 128;

    /// Suffix appended to a session directory once a finalize call owns it
    pub const CLAIMED_SUFFIX: &str = ".claimed";

    /// Sessions untouched for this long are swept (seconds)
    pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

    /// Interval between background sweeps (seconds)
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
}

/// HTTP server constants
pub mod server {
    /// Default listen address
    pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

    /// Largest accepted request body. Clients send 3 MiB of base64 per chunk.
    pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

    /// Header carrying the authenticated user id from the identity gateway
    pub const DEFAULT_USER_HEADER: &str = "x-user-id";

    /// Content type of the streamed analysis report
    pub const REPORT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
}

/// Generative AI provider constants
pub mod genai {
    /// Default provider name
    pub const DEFAULT_PROVIDER: &str = "gemini";

    /// Default generation model
    pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

    /// Default REST endpoint
    pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

    /// Environment variable consulted when no key is configured
    pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

    /// Timeout for upload and delete requests (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Upper bound on one streamed generation (seconds)
    pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;

    /// Connection establishment timeout (seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Display name given to uploaded journal documents
    pub const DOCUMENT_DISPLAY_NAME: &str = "journal";
}

/// Journal analytics constants
pub mod journal {
    /// Default SQLite database path
    pub const DEFAULT_DATABASE_PATH: &str = "guanxin.db";

    /// Number of recent entries scanned for to-dos
    pub const RECENT_TODO_ENTRIES: usize = 14;

    /// Completed to-dos stay visible for this many days after the entry was updated
    pub const TODO_DONE_GRACE_DAYS: i64 = 3;

    /// Window scanned for missing entries (days, ending yesterday)
    pub const MISSING_WINDOW_DAYS: i64 = 30;

    /// Maximum search preview length (characters)
    pub const PREVIEW_CHARS: usize = 80;

    /// To-do keys read from an entry's content
    pub const TODO_KEYS: [&str; 6] = [
        "love_body_todo",
        "love_speech_todo",
        "love_mind_todo",
        "steady_body_todo",
        "steady_speech_todo",
        "steady_mind_todo",
    ];

    /// Suffix of the key holding a to-do's done flag
    pub const DONE_SUFFIX: &str = "_done";
}
