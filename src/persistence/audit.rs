use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;

/// Append `records` to an NDJSON file, one object per line. Existing lines
/// are never rewritten.
pub fn append_ndjson<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTrail {
    Deletion,
    Rename,
    Move,
    Ingest,
}

/// Audit sink for the engine. Writes are serialized so concurrent records
/// never interleave within a line; failures are logged and swallowed.
pub struct AuditLog {
    deletion: PathBuf,
    rename: PathBuf,
    moves: PathBuf,
    ingest: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            deletion: config.deletion_log_path(),
            rename: config.rename_log_path(),
            moves: config.move_log_path(),
            ingest: config.ingest_log_path(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, trail: AuditTrail) -> &Path {
        match trail {
            AuditTrail::Deletion => &self.deletion,
            AuditTrail::Rename => &self.rename,
            AuditTrail::Move => &self.moves,
            AuditTrail::Ingest => &self.ingest,
        }
    }

    pub fn record<T: Serialize>(&self, trail: AuditTrail, records: &[T]) {
        let path = self.path(trail);
        let _guard = self.write_lock.lock();
        if let Err(e) = append_ndjson(path, records) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to append audit record"
            );
        }
    }
}
