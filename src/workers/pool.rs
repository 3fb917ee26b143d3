use crossbeam::channel::{self, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::buffer_pool::BufferPool;
use crate::error::StorageError;
use crate::models::file::{StoreOutcome, StoreRequest};
use crate::services::sniff::{detect_content_type, SNIFF_LEN};
use crate::services::StorageManager;

/// One file to store, tagged with its position in the submitted batch.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub index: usize,
    pub path: PathBuf,
    pub filename: String,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub category_hint: Option<String>,
    pub storage_override: Option<String>,
}

#[derive(Debug)]
pub struct JobResult {
    pub index: usize,
    pub filename: String,
    pub outcome: Result<StoreOutcome, StorageError>,
}

/// Fixed set of OS threads consuming a bounded job queue and producing
/// into a bounded result queue.
pub struct WorkerPool {
    workers: usize,
    job_capacity: usize,
    job_tx: Mutex<Option<Sender<IngestJob>>>,
    result_tx: Mutex<Option<Sender<JobResult>>>,
    result_rx: Receiver<JobResult>,
    /// Dropped by `shutdown`; wakes workers stuck on a full result queue.
    closing_tx: Mutex<Option<Sender<()>>>,
    closing_rx: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    cancelled: Arc<AtomicBool>,
    buffers: BufferPool,
}

impl WorkerPool {
    pub fn new(workers: usize, job_capacity: usize, result_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (result_tx, result_rx) = channel::bounded(result_capacity.max(1));
        let (closing_tx, closing_rx) = channel::bounded(0);
        Self {
            workers,
            job_capacity: job_capacity.max(1),
            job_tx: Mutex::new(None),
            result_tx: Mutex::new(Some(result_tx)),
            result_rx,
            closing_tx: Mutex::new(Some(closing_tx)),
            closing_rx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            buffers: BufferPool::for_workers(workers),
        }
    }

    /// Spawn the worker threads. A pool starts at most once.
    pub fn start(&self, manager: Arc<StorageManager>) -> Result<(), StorageError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StorageError::PoolAlreadyStarted);
        }
        let result_tx = self
            .result_tx
            .lock()
            .clone()
            .ok_or(StorageError::PoolShutdown)?;
        let (job_tx, job_rx) = channel::bounded::<IngestJob>(self.job_capacity);

        let mut handles = self.handles.lock();
        for i in 0..self.workers {
            let worker = Worker {
                jobs: job_rx.clone(),
                results: result_tx.clone(),
                closing: self.closing_rx.clone(),
                manager: manager.clone(),
                buffers: self.buffers.clone(),
                cancelled: self.cancelled.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("ingest-worker-{}", i))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }
        *self.job_tx.lock() = Some(job_tx);
        tracing::debug!(workers = self.workers, capacity = self.job_capacity, "Worker pool started");
        Ok(())
    }

    /// Enqueue without blocking.
    pub fn submit(&self, job: IngestJob) -> Result<(), StorageError> {
        let guard = self.job_tx.lock();
        let tx = guard.as_ref().ok_or(StorageError::PoolShutdown)?;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => StorageError::QueueFull,
            TrySendError::Disconnected(_) => StorageError::PoolShutdown,
        })
    }

    pub fn results(&self) -> Receiver<JobResult> {
        self.result_rx.clone()
    }

    /// Jobs still queued are answered with `Cancelled` instead of being run.
    /// Jobs already running finish normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Close the job queue, wait for every worker to drain it, then close
    /// the result stream. Results that no longer fit in the result queue
    /// once shutdown has begun are discarded. Safe to call more than once.
    pub fn shutdown(&self) {
        drop(self.job_tx.lock().take());
        drop(self.closing_tx.lock().take());
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Ingest worker panicked");
            }
        }
        drop(self.result_tx.lock().take());
        self.cancel();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    jobs: Receiver<IngestJob>,
    results: Sender<JobResult>,
    closing: Receiver<()>,
    manager: Arc<StorageManager>,
    buffers: BufferPool,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        for job in self.jobs.iter() {
            let index = job.index;
            let filename = job.filename.clone();
            let outcome = if self.cancelled.load(Ordering::SeqCst) {
                Err(StorageError::Cancelled)
            } else {
                self.process(job)
            };
            if let Err(ref e) = outcome {
                tracing::debug!(index, filename = %filename, error = %e, "Ingest job failed");
            }
            let result = JobResult {
                index,
                filename,
                outcome,
            };
            if !self.deliver(result) {
                break;
            }
        }
    }

    /// Hand a result to the collector. Returns false once nobody can
    /// receive results any more.
    fn deliver(&self, result: JobResult) -> bool {
        let result = match self.results.try_send(result) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => return false,
            Err(TrySendError::Full(result)) => result,
        };
        let index = result.index;
        select! {
            send(self.results, result) -> sent => sent.is_ok(),
            recv(self.closing) -> _ => {
                tracing::debug!(index, "Result queue full during shutdown, result discarded");
                true
            }
        }
    }

    fn process(&self, job: IngestJob) -> Result<StoreOutcome, StorageError> {
        let mut file = File::open(&job.path)?;
        let declared_size = file.metadata().ok().map(|m| m.len());

        let mut buf = self.buffers.checkout();
        let mime = match job.content_type.filter(|ct| !ct.trim().is_empty()) {
            Some(ct) => ct,
            None => {
                buf.resize(SNIFF_LEN, 0);
                let n = read_head(&mut file, &mut buf)?;
                buf.truncate(n);
                detect_content_type(&buf, &job.filename)
            }
        };

        let reader = Cursor::new(&buf[..]).chain(file);
        self.manager.store_file(
            reader,
            StoreRequest {
                filename: job.filename,
                mime_type: Some(mime),
                declared_size,
                metadata: job.metadata,
                category_hint: job.category_hint,
                storage_override: job.storage_override,
            },
        )
    }
}

/// Fill `buf` as far as the reader allows; returns the bytes read.
fn read_head<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
