//! Concurrent batch ingestion: a thread pool feeding `StorageManager::store_file`.

pub mod buffer_pool;
pub mod ingest;
pub mod pool;

pub use ingest::{ingest_batch, IngestOptions};
pub use pool::{IngestJob, JobResult, WorkerPool};
