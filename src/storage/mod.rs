pub mod chunk_store;
pub mod database;

pub use chunk_store::{ChunkStore, FsChunkStore, MemoryChunkStore, SharedChunkStore};
pub use database::{Database, PoolConfig, SharedDatabase};
