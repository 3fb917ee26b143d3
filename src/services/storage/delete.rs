use chrono::Utc;
use serde::Serialize;

use super::StorageManager;
use crate::error::StorageError;
use crate::models::file::{BatchDeleteItem, BatchDeleteResult, DeleteResult, FileMetadata};
use crate::persistence::audit::AuditTrail;
use crate::persistence::wal::WalEntry;

#[derive(Serialize)]
struct DeletionRecord<'a> {
    action: &'a str,
    id: &'a str,
    hash: &'a str,
    original_name: &'a str,
    stored_path: &'a str,
    space_reclaimed: u64,
    timestamp: chrono::DateTime<Utc>,
}

impl StorageManager {
    pub fn soft_delete_file(&self, identifier: &str) -> Result<DeleteResult, StorageError> {
        let mut journal = self.journal.lock();
        let mut meta = self.lookup(identifier)?;
        if meta.is_deleted() {
            return Err(StorageError::AlreadyDeleted(meta.id));
        }
        meta.deleted_at = Some(Utc::now());
        journal.append(&WalEntry::FileUpserted { file: meta.clone() })?;
        self.index.upsert(meta.clone());
        drop(journal);

        self.record_deletion("soft_delete", &meta, 0);
        tracing::info!(id = %meta.id, "File soft-deleted");
        Ok(DeleteResult {
            id: meta.id,
            soft: true,
            space_reclaimed: 0,
        })
    }

    pub fn restore_file(&self, identifier: &str) -> Result<FileMetadata, StorageError> {
        let mut journal = self.journal.lock();
        let mut meta = self.lookup(identifier)?;
        if !meta.is_deleted() {
            return Err(StorageError::NotDeleted(meta.id));
        }
        meta.deleted_at = None;
        journal.append(&WalEntry::FileUpserted { file: meta.clone() })?;
        self.index.upsert(meta.clone());
        drop(journal);

        self.record_deletion("restore", &meta, 0);
        tracing::info!(id = %meta.id, "File restored");
        Ok(meta)
    }

    /// Remove the entry for good. The bytes go only when no other entry
    /// still references the same stored path. They are unlinked before the
    /// removal is journaled, so a failed unlink leaves the entry in place.
    pub fn hard_delete_file(&self, identifier: &str) -> Result<DeleteResult, StorageError> {
        let mut journal = self.journal.lock();
        let meta = self.lookup(identifier)?;
        let path = self.storage_path(&meta.stored_path);
        let last_reference = self.index.path_refcount(&meta.stored_path) <= 1;

        let mut space_reclaimed = 0;
        if last_reference {
            match std::fs::remove_file(&path) {
                Ok(()) => space_reclaimed = meta.size,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "Bytes already gone at hard delete");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let journaled = journal.append(&WalEntry::FileRemoved {
            id: meta.id.clone(),
        });
        if let Err(e) = journaled {
            if !last_reference {
                return Err(e.into());
            }
            // The bytes are gone; keep the index honest. Boot reconcile
            // drops the journaled entry for the same reason.
            self.index.remove(&meta.id);
            self.cleanup_empty_dirs(&path);
            return Err(e.into());
        }
        let (removed, remaining) = self
            .index
            .remove(&meta.id)
            .ok_or_else(|| StorageError::NotFound(format!("File {} not found", meta.id)))?;
        if last_reference {
            self.cleanup_empty_dirs(&path);
        }
        drop(journal);

        self.record_deletion("hard_delete", &removed, space_reclaimed);
        tracing::info!(
            id = %removed.id,
            remaining_refs = remaining,
            space_reclaimed,
            "File hard-deleted"
        );
        Ok(DeleteResult {
            id: removed.id,
            soft: false,
            space_reclaimed,
        })
    }

    /// Delete each id independently; failures are reported per item.
    pub fn batch_delete(&self, ids: &[String], soft: bool) -> BatchDeleteResult {
        let mut results = Vec::with_capacity(ids.len());
        let mut space_reclaimed = 0;
        for id in ids {
            let outcome = if soft {
                self.soft_delete_file(id)
            } else {
                self.hard_delete_file(id)
            };
            match outcome {
                Ok(res) => {
                    space_reclaimed += res.space_reclaimed;
                    results.push(BatchDeleteItem {
                        id: id.clone(),
                        success: true,
                        error: None,
                        space_reclaimed: res.space_reclaimed,
                    });
                }
                Err(e) => results.push(BatchDeleteItem {
                    id: id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    space_reclaimed: 0,
                }),
            }
        }
        let total_deleted = results.iter().filter(|r| r.success).count();
        BatchDeleteResult {
            total_failed: results.len() - total_deleted,
            total_deleted,
            space_reclaimed,
            results,
        }
    }

    fn record_deletion(&self, action: &str, meta: &FileMetadata, space_reclaimed: u64) {
        self.audit.record(
            AuditTrail::Deletion,
            &[DeletionRecord {
                action,
                id: &meta.id,
                hash: &meta.hash,
                original_name: &meta.original_name,
                stored_path: &meta.stored_path,
                space_reclaimed,
                timestamp: Utc::now(),
            }],
        );
    }
}
