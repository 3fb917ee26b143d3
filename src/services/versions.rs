use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::models::version::{FileVersion, NewVersion, VersionDiff, VersionedFile};
use crate::persistence::wal::{Journal, WalEntry};
use crate::services::hasher::stage_stream;
use crate::services::sniff::{detect_content_type, essence, SNIFF_LEN};

const MAX_FILE_ID_LEN: usize = 256;

/// Append-only version chains. Content is stored once per hash under
/// `objects/<hh>/<hash>`, so reverting never copies bytes.
pub struct VersionStore {
    objects_dir: PathBuf,
    staging_dir: PathBuf,
    max_versions: usize,
    journal: Journal,
    chains: DashMap<String, VersionedFile>,
}

fn validate_file_id(file_id: &str) -> Result<&str, StorageError> {
    let id = file_id.trim();
    if id.is_empty() || id.len() > MAX_FILE_ID_LEN || id.chars().any(char::is_control) {
        return Err(StorageError::InvalidFilename(format!(
            "'{}' is not a valid file id",
            file_id
        )));
    }
    Ok(id)
}

impl VersionStore {
    pub fn new(
        objects_dir: PathBuf,
        staging_dir: PathBuf,
        max_versions: usize,
        journal: Journal,
        chains: HashMap<String, VersionedFile>,
    ) -> Self {
        Self {
            objects_dir,
            staging_dir,
            max_versions,
            journal,
            chains: chains.into_iter().collect(),
        }
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.objects_dir.join(&hash[..2.min(hash.len())]).join(hash)
    }

    pub fn to_map(&self) -> HashMap<String, VersionedFile> {
        self.chains
            .iter()
            .map(|c| (c.key().clone(), c.value().clone()))
            .collect()
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    fn check_limit(&self, chain: &VersionedFile) -> Result<(), StorageError> {
        if chain.versions.len() >= self.max_versions {
            return Err(StorageError::VersionLimitReached {
                file_id: chain.file_id.clone(),
                limit: self.max_versions,
            });
        }
        Ok(())
    }

    pub fn create_version<R: Read>(
        &self,
        file_id: &str,
        mut content: R,
        info: NewVersion,
    ) -> Result<FileVersion, StorageError> {
        let file_id = validate_file_id(file_id)?;
        if let Some(chain) = self.chains.get(file_id) {
            self.check_limit(&chain)?;
        }

        let mut head = Vec::with_capacity(SNIFF_LEN);
        (&mut content).take(SNIFF_LEN as u64).read_to_end(&mut head)?;
        let mime_type = match info.mime_type.as_deref().map(essence) {
            Some(m) if !m.is_empty() => m,
            _ => detect_content_type(&head, &info.filename),
        };
        let staged = stage_stream(std::io::Cursor::new(head).chain(content), &self.staging_dir)?;

        // Journal before chain: the snapshot writer takes them in the same order.
        let mut journal = self.journal.lock();
        let next = match self.chains.get(file_id) {
            Some(chain) => {
                self.check_limit(&chain)?;
                chain.next_version()
            }
            None => 1,
        };

        let version = FileVersion {
            version: next,
            hash: staged.hash().to_string(),
            size: staged.size(),
            uploaded_at: Utc::now(),
            uploaded_by: info.uploaded_by,
            comment: info.comment,
            filename: info.filename,
            mime_type,
            is_current: true,
        };
        let object = self.object_path(&version.hash);
        let written = staged.persist_if_absent(&object)?;
        if let Err(e) = journal.append(&WalEntry::VersionAppended {
            file_id: file_id.to_string(),
            version: version.clone(),
        }) {
            if written {
                self.discard_object(&object);
            }
            return Err(e.into());
        }
        self.chains
            .entry(file_id.to_string())
            .or_insert_with(|| VersionedFile::new(file_id))
            .push(version.clone());

        tracing::info!(
            file_id = %file_id,
            version = version.version,
            hash = %version.hash,
            "Version created"
        );
        Ok(version)
    }

    /// Remove an object written for a version that never made it into the journal.
    fn discard_object(&self, object: &Path) {
        if let Err(e) = std::fs::remove_file(object) {
            tracing::warn!(path = %object.display(), error = %e, "Failed to remove orphaned version object");
            return;
        }
        if let Some(parent) = object.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }

    /// Newest first.
    pub fn list_versions(&self, file_id: &str) -> Result<Vec<FileVersion>, StorageError> {
        let file_id = validate_file_id(file_id)?;
        let chain = self
            .chains
            .get(file_id)
            .ok_or_else(|| StorageError::NotFound(format!("No versions for {}", file_id)))?;
        let mut versions = chain.versions.clone();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    pub fn get_versioned_file(&self, file_id: &str) -> Result<VersionedFile, StorageError> {
        let file_id = validate_file_id(file_id)?;
        self.chains
            .get(file_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| StorageError::NotFound(format!("No versions for {}", file_id)))
    }

    pub fn get_version(&self, file_id: &str, version: u32) -> Result<FileVersion, StorageError> {
        let file_id = validate_file_id(file_id)?;
        let chain = self
            .chains
            .get(file_id)
            .ok_or_else(|| StorageError::NotFound(format!("No versions for {}", file_id)))?;
        chain
            .get(version)
            .cloned()
            .ok_or_else(|| StorageError::VersionNotFound {
                file_id: file_id.to_string(),
                version,
            })
    }

    pub fn get_version_file(
        &self,
        file_id: &str,
        version: u32,
    ) -> Result<(FileVersion, File), StorageError> {
        let meta = self.get_version(file_id, version)?;
        let file = File::open(self.object_path(&meta.hash))?;
        Ok((meta, file))
    }

    /// Append a new version whose content is that of `version`.
    pub fn revert_version(
        &self,
        file_id: &str,
        version: u32,
        comment: Option<String>,
        uploaded_by: &str,
    ) -> Result<FileVersion, StorageError> {
        let file_id = validate_file_id(file_id)?;
        let mut journal = self.journal.lock();
        let mut chain = self
            .chains
            .get_mut(file_id)
            .ok_or_else(|| StorageError::NotFound(format!("No versions for {}", file_id)))?;
        let source = chain
            .get(version)
            .cloned()
            .ok_or_else(|| StorageError::VersionNotFound {
                file_id: file_id.to_string(),
                version,
            })?;
        self.check_limit(&chain)?;

        if !self.object_path(&source.hash).exists() {
            return Err(StorageError::NotFound(format!(
                "Content of version {} of {} is missing",
                version, file_id
            )));
        }

        let reverted = FileVersion {
            version: chain.next_version(),
            hash: source.hash,
            size: source.size,
            uploaded_at: Utc::now(),
            uploaded_by: uploaded_by.to_string(),
            comment: comment.unwrap_or_else(|| format!("Reverted to version {}", version)),
            filename: source.filename,
            mime_type: source.mime_type,
            is_current: true,
        };
        journal.append(&WalEntry::VersionAppended {
            file_id: file_id.to_string(),
            version: reverted.clone(),
        })?;
        chain.push(reverted.clone());

        tracing::info!(
            file_id = %file_id,
            from = version,
            version = reverted.version,
            "Version reverted"
        );
        Ok(reverted)
    }

    /// Metadata-only comparison of two versions.
    pub fn get_version_diff(
        &self,
        file_id: &str,
        from: u32,
        to: u32,
    ) -> Result<VersionDiff, StorageError> {
        let file_id = validate_file_id(file_id)?;
        let a = self.get_version(file_id, from)?;
        let b = self.get_version(file_id, to)?;
        Ok(VersionDiff {
            file_id: file_id.to_string(),
            from_version: from,
            to_version: to,
            content_changed: a.hash != b.hash,
            size_delta: b.size as i64 - a.size as i64,
            time_elapsed_secs: b.uploaded_at.signed_duration_since(a.uploaded_at).num_seconds(),
            uploader_changed: a.uploaded_by != b.uploaded_by,
            filename_changed: a.filename != b.filename,
            mime_type_changed: a.mime_type != b.mime_type,
            comment_changed: a.comment != b.comment,
            from: a,
            to: b,
        })
    }
}
