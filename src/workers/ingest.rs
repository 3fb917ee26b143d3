use chrono::Utc;
use crossbeam::channel::RecvTimeoutError;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::pool::{IngestJob, JobResult, WorkerPool};
use crate::config::AppConfig;
use crate::error::StorageError;
use crate::models::file::StoreOutcome;
use crate::persistence::audit::AuditTrail;
use crate::services::StorageManager;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub workers: usize,
    /// Largest batch the job queue accepts.
    pub queue_capacity: usize,
    pub timeout: Duration,
}

impl IngestOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.effective_worker_count(),
            queue_capacity: config.job_queue_capacity,
            timeout: Duration::from_secs(config.batch_timeout_secs),
        }
    }
}

#[derive(Serialize)]
struct IngestRecord<'a> {
    index: usize,
    filename: &'a str,
    id: &'a str,
    hash: &'a str,
    category: &'a str,
    size: u64,
    duplicate: bool,
    timestamp: chrono::DateTime<Utc>,
}

/// Store every job through a dedicated worker pool and return the
/// outcomes in submission order. The first failing item (by index) fails
/// the whole batch. A batch larger than the job queue is refused with
/// `QueueFull` before anything is stored.
pub fn ingest_batch(
    manager: Arc<StorageManager>,
    jobs: Vec<IngestJob>,
    options: &IngestOptions,
) -> Result<Vec<StoreOutcome>, StorageError> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    let total = jobs.len();
    if total > options.queue_capacity {
        tracing::warn!(
            files = total,
            capacity = options.queue_capacity,
            "Ingest batch exceeds the job queue"
        );
        return Err(StorageError::QueueFull);
    }
    let pool = WorkerPool::new(options.workers.min(total), options.queue_capacity, total);
    pool.start(manager.clone())?;
    let results = pool.results();

    for job in jobs {
        if let Err(e) = pool.submit(job) {
            pool.cancel();
            pool.shutdown();
            return Err(e);
        }
    }

    let deadline = Instant::now() + options.timeout;
    let mut collected: Vec<JobResult> = Vec::with_capacity(total);
    let mut timed_out = false;
    while collected.len() < total {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match results.recv_timeout(remaining) {
            Ok(result) => collected.push(result),
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if timed_out {
        pool.cancel();
        let pending = total - collected.len();
        tracing::warn!(
            pending,
            timeout_secs = options.timeout.as_secs(),
            "Ingest batch deadline expired, discarding late results"
        );
        // Running workers finish on their own; their results are drained
        // off the caller's thread while the pool shuts down.
        std::thread::spawn(move || {
            let drain = std::thread::spawn(move || {
                for late in results.iter() {
                    tracing::debug!(index = late.index, "Discarded late ingest result");
                }
            });
            pool.shutdown();
            let _ = drain.join();
        });
        record_successes(&manager, &collected);
        return Err(StorageError::BatchTimeout(options.timeout.as_secs()));
    }

    pool.shutdown();
    if collected.len() < total {
        return Err(StorageError::PoolShutdown);
    }
    collected.sort_by_key(|r| r.index);
    record_successes(&manager, &collected);

    let mut outcomes = Vec::with_capacity(total);
    for result in collected {
        match result.outcome {
            Ok(outcome) => outcomes.push(outcome),
            Err(source) => {
                return Err(StorageError::IngestFailed {
                    index: result.index,
                    filename: result.filename,
                    source: Box::new(source),
                })
            }
        }
    }
    tracing::info!(
        files = outcomes.len(),
        duplicates = outcomes.iter().filter(|o| o.duplicate).count(),
        "Ingest batch complete"
    );
    Ok(outcomes)
}

fn record_successes(manager: &StorageManager, results: &[JobResult]) {
    let now = Utc::now();
    let records: Vec<IngestRecord> = results
        .iter()
        .filter_map(|r| {
            let outcome = r.outcome.as_ref().ok()?;
            Some(IngestRecord {
                index: r.index,
                filename: &r.filename,
                id: &outcome.file.id,
                hash: &outcome.file.hash,
                category: &outcome.file.category,
                size: outcome.file.size,
                duplicate: outcome.duplicate,
                timestamp: now,
            })
        })
        .collect();
    manager.audit().record(AuditTrail::Ingest, &records);
}
