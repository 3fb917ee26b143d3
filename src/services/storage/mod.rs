//! The storage engine: content-addressed placement, the metadata index,
//! deletion, relocation, search and version chains, behind one handle.

mod delete;
mod query;
mod relocate;
mod store;

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::StorageError;
use crate::models::file::FileMetadata;
use crate::models::snapshot::{IndexSnapshot, SNAPSHOT_VERSION};
use crate::models::version::VersionedFile;
use crate::persistence::audit::AuditLog;
use crate::persistence::snapshot::{load_snapshot, save_snapshot};
use crate::persistence::wal::{Journal, WalEntry, WalWriter};
use crate::services::classifier::Classifier;
use crate::services::index::MetadataIndex;
use crate::services::routing_rules::RoutingRules;
use crate::services::versions::VersionStore;

pub struct StorageManager {
    config: Arc<AppConfig>,
    index: MetadataIndex,
    versions: VersionStore,
    classifier: Classifier,
    journal: Journal,
    audit: AuditLog,
}

/// What boot recovery found, for logging by the caller.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub snapshot_files: usize,
    pub replayed_entries: usize,
    pub dropped_missing: usize,
    pub cleared_staging: usize,
}

impl StorageManager {
    /// Open (or create) a store rooted at `config.data_dir`: load the
    /// snapshot, replay the journal and reconcile with the disk.
    pub fn open(config: AppConfig) -> Result<Self, StorageError> {
        Self::open_with_report(config).map(|(manager, _)| manager)
    }

    pub fn open_with_report(config: AppConfig) -> Result<(Self, RecoveryReport), StorageError> {
        for dir in config.required_dirs() {
            std::fs::create_dir_all(&dir)?;
        }
        let mut report = RecoveryReport::default();

        let (mut files, mut chains) = match load_snapshot(&config.snapshot_path())? {
            Some(snapshot) => {
                tracing::info!(
                    files = snapshot.files.len(),
                    "Loaded snapshot from {}",
                    snapshot.timestamp
                );
                (snapshot.files, snapshot.versions)
            }
            None => (HashMap::new(), HashMap::new()),
        };
        report.snapshot_files = files.len();

        let entries = WalWriter::read_entries(&config.wal_dir())?;
        report.replayed_entries = entries.len();
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Replaying WAL entries");
        }
        replay_wal_entries(&mut files, &mut chains, entries);

        let storage_dir = config.storage_dir();
        files.retain(|id, meta| {
            let present = storage_dir.join(&meta.stored_path).is_file();
            if !present {
                tracing::warn!(id = %id, path = %meta.stored_path, "Bytes missing, dropping metadata entry");
                report.dropped_missing += 1;
            }
            present
        });
        report.cleared_staging = clear_dir(&config.staging_dir());

        let journal: Journal = Arc::new(Mutex::new(WalWriter::open(&config.wal_dir())?));
        let rules = Arc::new(RoutingRules::load(&config.routing_rules_path())?);
        let versions = VersionStore::new(
            config.versions_dir(),
            config.staging_dir(),
            config.max_versions,
            journal.clone(),
            chains,
        );

        let manager = Self {
            index: MetadataIndex::from_entries(files.into_values()),
            versions,
            classifier: Classifier::new(rules),
            journal,
            audit: AuditLog::new(&config),
            config: Arc::new(config),
        };

        if report.replayed_entries > 0 || report.dropped_missing > 0 {
            manager.write_snapshot()?;
        }
        Ok((manager, report))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn routing_rules(&self) -> &RoutingRules {
        self.classifier.rules()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Absolute path of a stored-path value.
    pub fn storage_path(&self, stored_path: &str) -> PathBuf {
        self.config.storage_dir().join(stored_path)
    }

    pub fn get_file(&self, identifier: &str) -> Result<FileMetadata, StorageError> {
        self.lookup(identifier)
    }

    pub fn open_file(&self, identifier: &str) -> Result<(FileMetadata, File), StorageError> {
        let meta = self.lookup(identifier)?;
        let file = File::open(self.storage_path(&meta.stored_path))?;
        Ok((meta, file))
    }

    /// Persist the whole index and truncate the journal. Both happen under
    /// the journal lock so no mutation can slip between them.
    pub fn write_snapshot(&self) -> Result<(), StorageError> {
        let mut journal = self.journal.lock();
        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            files: self.index.to_map(),
            versions: self.versions.to_map(),
        };
        save_snapshot(&self.config.snapshot_path(), &snapshot)?;
        let folded = journal.entry_count();
        journal.truncate()?;
        tracing::info!(
            files = snapshot.files.len(),
            journal_entries = folded,
            version_chains = snapshot.versions.len(),
            "Snapshot written"
        );
        Ok(())
    }

    fn lookup(&self, identifier: &str) -> Result<FileMetadata, StorageError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(StorageError::InvalidFilename("identifier is empty".into()));
        }
        self.index
            .resolve(identifier)
            .ok_or_else(|| StorageError::NotFound(format!("File {} not found", identifier)))
    }

    /// Remove now-empty directories between `file_path` and the storage root.
    fn cleanup_empty_dirs(&self, file_path: &Path) {
        let root = self.config.storage_dir();
        let mut dir = file_path.parent();
        while let Some(d) = dir {
            if d == root || !d.starts_with(&root) {
                break;
            }
            match std::fs::read_dir(d) {
                Ok(mut entries) => {
                    if entries.next().is_none() {
                        let _ = std::fs::remove_dir(d);
                    } else {
                        break;
                    }
                }
                Err(_) => break,
            }
            dir = d.parent();
        }
    }
}

fn replay_wal_entries(
    files: &mut HashMap<String, FileMetadata>,
    chains: &mut HashMap<String, VersionedFile>,
    entries: Vec<WalEntry>,
) {
    for entry in entries {
        match entry {
            WalEntry::FileUpserted { file } => {
                files.insert(file.id.clone(), file);
            }
            WalEntry::FileRemoved { id } => {
                files.remove(&id);
            }
            WalEntry::VersionAppended { file_id, version } => {
                let chain = chains
                    .entry(file_id.clone())
                    .or_insert_with(|| VersionedFile::new(&file_id));
                if chain.get(version.version).is_none() {
                    chain.push(version);
                }
            }
        }
    }
}

fn clear_dir(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        if entry.path().is_file() && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::warn!(count = removed, "Removed abandoned staging files");
    }
    removed
}
