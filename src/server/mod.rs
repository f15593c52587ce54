//! HTTP Server
//!
//! axum router over the analysis pipeline and the journal service, plus the
//! background sweeper that drops abandoned upload sessions.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;

use crate::config::Config;
use crate::storage::SharedChunkStore;
use crate::types::Result;

/// Periodically remove upload sessions older than `ttl`
pub fn spawn_sweeper(store: SharedChunkStore, ttl: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.sweep_stale(ttl).await {
                Ok(0) => debug!("Sweeper found no stale sessions"),
                Ok(n) => info!("Swept {} stale upload session(s)", n),
                Err(e) => warn!("Upload sweep failed: {}", e),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Run the server until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let sweeper = spawn_sweeper(
        state.store.clone(),
        config.upload.session_ttl(),
        config.upload.sweep_interval(),
    );

    let app = router(state, &config.server);
    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!(
        "Listening on {} (provider: {}, model: {})",
        listener.local_addr()?,
        config.genai.provider,
        config.genai.model
    );
    info!("Upload sessions stored under {}", config.upload.root_dir.display());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    served?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunk_store::test_support::chunk;
    use crate::storage::{ChunkStore, MemoryChunkStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweeper_removes_stale_sessions() {
        let store = Arc::new(MemoryChunkStore::new());
        store.put_chunk(&chunk("old", 0, 0, 1, "QQ==")).await.unwrap();

        let handle = spawn_sweeper(store.clone(), Duration::ZERO, Duration::from_millis(10));
        for _ in 0..50 {
            if store.session_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(store.session_count(), 0);
    }
}
