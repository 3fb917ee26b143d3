use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::StorageManager;
use crate::error::StorageError;
use crate::models::file::{BatchCopyItem, BatchCopyResult, CopyRequest, FileMetadata, MoveRequest};
use crate::models::value::validate_metadata;
use crate::persistence::audit::AuditTrail;
use crate::persistence::wal::WalEntry;
use crate::services::naming::{normalize_category, stored_path, validate_new_name};

/// How bytes reached their new stored path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocation {
    Renamed,
    /// Other entries still use the old path, so the mover got its own copy.
    Copied,
}

#[derive(Serialize)]
struct RenameRecord<'a> {
    id: &'a str,
    old_name: &'a str,
    new_name: &'a str,
    old_path: &'a str,
    new_path: &'a str,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct MoveRecord<'a> {
    id: &'a str,
    hash: &'a str,
    from_category: &'a str,
    to_category: &'a str,
    from_path: &'a str,
    to_path: &'a str,
    timestamp: chrono::DateTime<Utc>,
}

struct PlannedMove {
    before: FileMetadata,
    after: FileMetadata,
    shared: bool,
}

fn file_name_of(stored_path: &str) -> &str {
    stored_path.rsplit('/').next().unwrap_or(stored_path)
}

impl StorageManager {
    /// Refuse a target that is on disk or claimed by another entry.
    fn check_target_free(&self, rel_path: &str) -> Result<(), StorageError> {
        if self.index.path_refcount(rel_path) > 0 || self.storage_path(rel_path).exists() {
            return Err(StorageError::NameConflict(format!(
                "{} already exists",
                rel_path
            )));
        }
        Ok(())
    }

    fn relocate_bytes(
        &self,
        from: &str,
        to: &str,
        shared: bool,
    ) -> Result<Relocation, StorageError> {
        let src = self.storage_path(from);
        let dest = self.storage_path(to);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if shared {
            std::fs::copy(&src, &dest)?;
            Ok(Relocation::Copied)
        } else {
            std::fs::rename(&src, &dest)?;
            self.cleanup_empty_dirs(&src);
            Ok(Relocation::Renamed)
        }
    }

    fn undo_relocation(&self, from: &str, to: &str, relocation: Relocation) {
        let dest = self.storage_path(to);
        let result = match relocation {
            Relocation::Copied => std::fs::remove_file(&dest),
            Relocation::Renamed => {
                let src = self.storage_path(from);
                if let Some(parent) = src.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::rename(&dest, &src)
            }
        };
        if let Err(e) = result {
            tracing::error!(from, to, error = %e, "Failed to roll back relocation");
        }
        self.cleanup_empty_dirs(&dest);
    }

    /// A relocated entry is the only holder of its new path, so it stops
    /// being a link whether its bytes were copied or renamed.
    fn apply_relocation(meta: &mut FileMetadata, new_path: String) {
        meta.stored_path = new_path;
        meta.is_hard_link = false;
        meta.linked_to = None;
    }

    /// Change an entry's display name, and with `update_stored_file` the
    /// physical file name as well.
    pub fn rename_file(
        &self,
        identifier: &str,
        new_name: &str,
        update_stored_file: bool,
    ) -> Result<FileMetadata, StorageError> {
        let new_name = validate_new_name(new_name)?;

        let mut journal = self.journal.lock();
        let before = self.lookup(identifier)?;
        let mut after = before.clone();
        after.original_name = new_name;

        let mut relocation = None;
        if update_stored_file {
            let new_path = stored_path(&before.category, &before.hash, &after.original_name);
            if new_path != before.stored_path {
                self.check_target_free(&new_path)?;
                let shared = self.index.path_refcount(&before.stored_path) > 1;
                let how = self.relocate_bytes(&before.stored_path, &new_path, shared)?;
                Self::apply_relocation(&mut after, new_path);
                relocation = Some(how);
            }
        }

        if let Err(e) = journal.append(&WalEntry::FileUpserted { file: after.clone() }) {
            if let Some(how) = relocation {
                self.undo_relocation(&before.stored_path, &after.stored_path, how);
            }
            return Err(e.into());
        }
        self.index.upsert(after.clone());
        drop(journal);

        self.audit.record(
            AuditTrail::Rename,
            &[RenameRecord {
                id: &after.id,
                old_name: &before.original_name,
                new_name: &after.original_name,
                old_path: &before.stored_path,
                new_path: &after.stored_path,
                timestamp: Utc::now(),
            }],
        );
        tracing::info!(
            id = %after.id,
            old_name = %before.original_name,
            new_name = %after.original_name,
            "File renamed"
        );
        Ok(after)
    }

    pub fn move_file(
        &self,
        identifier: &str,
        new_category: &str,
    ) -> Result<FileMetadata, StorageError> {
        let mut moved = self.batch_move(&[MoveRequest {
            id: identifier.to_string(),
            new_category: new_category.to_string(),
        }])?;
        moved
            .pop()
            .ok_or_else(|| StorageError::NotFound(format!("File {} not found", identifier)))
    }

    /// Move several entries as one unit. Every item is validated first; if
    /// applying any move fails, the ones already applied are reverted.
    pub fn batch_move(&self, moves: &[MoveRequest]) -> Result<Vec<FileMetadata>, StorageError> {
        let categories = moves
            .iter()
            .map(|m| normalize_category(&m.new_category))
            .collect::<Result<Vec<_>, _>>()?;

        let mut journal = self.journal.lock();

        let mut seen = HashSet::new();
        let mut targets = HashSet::new();
        // References to each source path that stay behind after earlier moves in this batch.
        let mut refs_left: HashMap<String, usize> = HashMap::new();
        let mut plan = Vec::with_capacity(moves.len());
        for (req, category) in moves.iter().zip(categories) {
            let before = self.lookup(&req.id)?;
            if !seen.insert(before.id.clone()) {
                return Err(StorageError::NameConflict(format!(
                    "{} appears more than once in the batch",
                    before.id
                )));
            }
            let mut after = before.clone();
            after.category = category;
            if after.category == before.category {
                plan.push(PlannedMove {
                    before,
                    after,
                    shared: false,
                });
                continue;
            }
            let new_path = format!("{}/{}", after.category, file_name_of(&before.stored_path));
            if !targets.insert(new_path.clone()) {
                return Err(StorageError::NameConflict(format!(
                    "{} is targeted twice in the batch",
                    new_path
                )));
            }
            self.check_target_free(&new_path)?;

            let left = refs_left
                .entry(before.stored_path.clone())
                .or_insert_with(|| self.index.path_refcount(&before.stored_path));
            let shared = *left > 1;
            *left = left.saturating_sub(1);
            after.stored_path = new_path;
            plan.push(PlannedMove {
                before,
                after,
                shared,
            });
        }

        let mut applied: Vec<(usize, Relocation)> = Vec::new();
        for i in 0..plan.len() {
            let step = &plan[i];
            if step.after.stored_path == step.before.stored_path {
                continue;
            }
            match self.relocate_bytes(&step.before.stored_path, &step.after.stored_path, step.shared) {
                Ok(how) => {
                    let step = &mut plan[i];
                    let path = step.after.stored_path.clone();
                    Self::apply_relocation(&mut step.after, path);
                    applied.push((i, how));
                }
                Err(e) => {
                    self.rollback_moves(&plan, &applied);
                    return Err(e);
                }
            }
        }

        let entries: Vec<WalEntry> = plan
            .iter()
            .map(|step| WalEntry::FileUpserted {
                file: step.after.clone(),
            })
            .collect();
        if let Err(e) = journal.append_all(&entries) {
            self.rollback_moves(&plan, &applied);
            return Err(e.into());
        }
        for step in &plan {
            self.index.upsert(step.after.clone());
        }
        drop(journal);

        let records: Vec<MoveRecord> = plan
            .iter()
            .filter(|step| step.before.category != step.after.category)
            .map(|step| MoveRecord {
                id: &step.after.id,
                hash: &step.after.hash,
                from_category: &step.before.category,
                to_category: &step.after.category,
                from_path: &step.before.stored_path,
                to_path: &step.after.stored_path,
                timestamp: Utc::now(),
            })
            .collect();
        self.audit.record(AuditTrail::Move, &records);
        tracing::info!(moved = records.len(), requested = moves.len(), "Batch move applied");

        Ok(plan.into_iter().map(|step| step.after).collect())
    }

    fn rollback_moves(&self, plan: &[PlannedMove], applied: &[(usize, Relocation)]) {
        for &(i, how) in applied.iter().rev() {
            let step = &plan[i];
            self.undo_relocation(&step.before.stored_path, &step.after.stored_path, how);
        }
        if !applied.is_empty() {
            tracing::warn!(reverted = applied.len(), "Batch move rolled back");
        }
    }

    /// Create a new entry for existing content, either with its own bytes
    /// or as a hard link sharing the source's stored path.
    pub fn copy_file(
        &self,
        identifier: &str,
        req: CopyRequest,
    ) -> Result<FileMetadata, StorageError> {
        let new_name = req.new_name.as_deref().map(validate_new_name).transpose()?;
        let new_category = req
            .new_category
            .as_deref()
            .map(normalize_category)
            .transpose()?;
        if let Some(ref metadata) = req.metadata {
            validate_metadata(metadata)?;
        }

        let mut journal = self.journal.lock();
        let source = self.lookup(identifier)?;
        if source.is_deleted() {
            return Err(StorageError::AlreadyDeleted(source.id));
        }

        let name = new_name.unwrap_or_else(|| source.original_name.clone());
        let category = new_category.unwrap_or_else(|| source.category.clone());
        let mut copy = FileMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            original_name: name,
            category,
            uploaded_at: Utc::now(),
            deleted_at: None,
            metadata: req.metadata.unwrap_or_else(|| source.metadata.clone()),
            is_hard_link: req.hard_link,
            linked_to: req.hard_link.then(|| source.id.clone()),
            ..source.clone()
        };

        let mut written = None;
        if !req.hard_link {
            let new_path = stored_path(&copy.category, &copy.hash, &copy.original_name);
            self.check_target_free(&new_path)?;
            let dest = self.storage_path(&new_path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(self.storage_path(&source.stored_path), &dest)?;
            copy.stored_path = new_path;
            written = Some(dest);
        }

        if let Err(e) = journal.append(&WalEntry::FileUpserted { file: copy.clone() }) {
            if let Some(dest) = written {
                let _ = std::fs::remove_file(&dest);
                self.cleanup_empty_dirs(&dest);
            }
            return Err(e.into());
        }
        self.index.upsert(copy.clone());
        drop(journal);

        tracing::info!(
            source = %source.id,
            id = %copy.id,
            hard_link = copy.is_hard_link,
            "File copied"
        );
        Ok(copy)
    }

    /// Copy each item independently; failures are reported per item.
    pub fn batch_copy(&self, copies: Vec<CopyRequest>) -> BatchCopyResult {
        let mut results = Vec::with_capacity(copies.len());
        for req in copies {
            let id = req.id.clone();
            match self.copy_file(&id, req) {
                Ok(file) => results.push(BatchCopyItem {
                    id,
                    success: true,
                    error: None,
                    file: Some(file),
                }),
                Err(e) => results.push(BatchCopyItem {
                    id,
                    success: false,
                    error: Some(e.to_string()),
                    file: None,
                }),
            }
        }
        let total_copied = results.iter().filter(|r| r.success).count();
        BatchCopyResult {
            total_failed: results.len() - total_copied,
            total_copied,
            results,
        }
    }

    /// Merge `patch` into an entry's metadata, or replace the map outright.
    pub fn update_metadata(
        &self,
        identifier: &str,
        patch: BTreeMap<String, String>,
        merge: bool,
    ) -> Result<FileMetadata, StorageError> {
        if merge && patch.is_empty() {
            return Err(StorageError::InvalidMergeRequest(
                "merge requires at least one key".into(),
            ));
        }
        validate_metadata(&patch)?;

        let mut journal = self.journal.lock();
        let mut meta = self.lookup(identifier)?;
        let metadata = if merge {
            let mut merged = meta.metadata.clone();
            merged.extend(patch);
            merged
        } else {
            patch
        };
        validate_metadata(&metadata)?;
        meta.metadata = metadata;

        journal.append(&WalEntry::FileUpserted { file: meta.clone() })?;
        self.index.upsert(meta.clone());
        drop(journal);

        tracing::info!(id = %meta.id, keys = meta.metadata.len(), merge, "Metadata updated");
        Ok(meta)
    }
}
