//! Clean Command
//!
//! Removes upload sessions left behind by abandoned or crashed requests.

use std::time::Duration;

use crate::cli::Output;
use crate::config::ConfigLoader;
use crate::storage::{ChunkStore, FsChunkStore};
use crate::types::Result;

/// Sweep sessions older than `max_age_secs` (default: `upload.session_ttl_secs`)
pub async fn run(max_age_secs: Option<u64>) -> Result<()> {
    let config = ConfigLoader::load()?;
    let max_age = max_age_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.upload.session_ttl());

    let store = FsChunkStore::new(&config.upload.root_dir);
    let removed = store.sweep_stale(max_age).await?;

    let out = Output::new();
    if removed > 0 {
        out.success(&format!(
            "Removed {} stale upload session(s) from {}",
            removed,
            store.root().display()
        ));
    } else {
        out.info("No stale upload sessions");
    }
    Ok(())
}
