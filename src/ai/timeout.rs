//! Timeout handling for provider calls
//!
//! ```ignore
//! use crate::ai::timeout::{TimeoutConfig, with_timeout};
//!
//! let config = TimeoutConfig::from(&genai_config);
//! let doc = with_timeout(config.request, ingestion.upload(local), "document upload").await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::config::GenAiConfig;
use crate::constants::genai;
use crate::types::{GuanxinError, Result};

/// Timeouts applied around provider operations
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Upload and delete requests (default: 60 seconds)
    pub request: Duration,
    /// One full streamed generation, first byte to last (default: 5 minutes)
    pub generation: Duration,
    /// TCP/TLS connection establishment (default: 10 seconds)
    pub connect: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(genai::DEFAULT_TIMEOUT_SECS),
            generation: Duration::from_secs(genai::DEFAULT_GENERATION_TIMEOUT_SECS),
            connect: Duration::from_secs(genai::CONNECT_TIMEOUT_SECS),
        }
    }
}

impl From<&GenAiConfig> for TimeoutConfig {
    fn from(config: &GenAiConfig) -> Self {
        Self {
            request: config.request_timeout(),
            generation: config.generation_timeout(),
            ..Self::default()
        }
    }
}

/// Execute an async operation with a timeout
///
/// Returns `GuanxinError::Timeout` if the operation doesn't complete within
/// the specified duration. The inner future is dropped on expiry.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(GuanxinError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.request.as_secs(), 60);
        assert_eq!(config.generation.as_secs(), 300);
        assert_eq!(config.connect.as_secs(), 10);
    }

    #[test]
    fn test_timeout_config_from_genai() {
        let genai = GenAiConfig {
            timeout_secs: 5,
            generation_timeout_secs: 42,
            ..GenAiConfig::default()
        };
        let config = TimeoutConfig::from(&genai);
        assert_eq!(config.request, Duration::from_secs(5));
        assert_eq!(config.generation, Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, GuanxinError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, GuanxinError>(42)
            },
            "slow operation",
        )
        .await;
        assert!(matches!(result.unwrap_err(), GuanxinError::Timeout { .. }));
    }
}
