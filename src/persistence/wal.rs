use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::file::FileMetadata;
use crate::models::version::FileVersion;

/// One journaled index mutation. Entries carry full records so replay is a
/// plain overwrite and never has to recompute derived state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum WalEntry {
    FileUpserted { file: FileMetadata },
    FileRemoved { id: String },
    VersionAppended { file_id: String, version: FileVersion },
}

/// Shared handle to the journal. Holding the lock is what serializes
/// mutations of the index and the storage tree.
pub type Journal = Arc<Mutex<WalWriter>>;

pub struct WalWriter {
    dir: PathBuf,
    file: Option<std::fs::File>,
    entry_count: u64,
}

impl WalWriter {
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let wal_path = dir.join("current.wal");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file: Some(file),
            entry_count: 0,
        })
    }

    /// Append and fsync a single entry.
    pub fn append(&mut self, entry: &WalEntry) -> anyhow::Result<()> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Append several entries with one fsync at the end.
    pub fn append_all(&mut self, entries: &[WalEntry]) -> anyhow::Result<()> {
        if let Some(ref mut f) = self.file {
            for entry in entries {
                let data = bincode::serialize(entry)?;
                let len = data.len() as u32;
                f.write_all(&len.to_le_bytes())?;
                f.write_all(&data)?;
                self.entry_count += 1;
            }
            f.flush()?;
            f.sync_data()?;
        }
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn truncate(&mut self) -> anyhow::Result<()> {
        let wal_path = self.dir.join("current.wal");
        if let Some(ref mut f) = self.file {
            drop(std::mem::replace(
                f,
                std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&wal_path)?,
            ));
            f.sync_all()?;
            self.entry_count = 0;
        }
        Ok(())
    }

    pub fn read_entries(dir: &Path) -> anyhow::Result<Vec<WalEntry>> {
        let wal_path = dir.join("current.wal");
        if !wal_path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read(&wal_path)?;
        let mut entries = Vec::new();
        let mut cursor = 0;
        while cursor + 4 <= data.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&data[cursor..cursor + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            cursor += 4;
            if cursor + len > data.len() {
                tracing::warn!("WAL truncated at entry boundary, stopping replay");
                break;
            }
            match bincode::deserialize::<WalEntry>(&data[cursor..cursor + len]) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("WAL entry corrupt, stopping replay: {}", e);
                    break;
                }
            }
            cursor += len;
        }
        Ok(entries)
    }
}
