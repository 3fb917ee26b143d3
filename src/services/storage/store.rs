use chrono::Utc;
use serde_json::json;
use std::io::{Cursor, Read};

use super::StorageManager;
use crate::error::StorageError;
use crate::models::file::{FileMetadata, StoreOutcome, StoreRequest};
use crate::models::value::validate_metadata;
use crate::persistence::audit::AuditTrail;
use crate::persistence::wal::WalEntry;
use crate::services::classifier::StorageOverride;
use crate::services::hasher::stage_stream;
use crate::services::naming::{sanitize_filename, stored_path, upload_name};
use crate::services::sniff::{detect_content_type, essence, SNIFF_LEN};

impl StorageManager {
    /// Stream `reader` into the store. Identical content is stored once;
    /// a second upload of the same bytes returns the existing entry.
    pub fn store_file<R: Read>(
        &self,
        reader: R,
        req: StoreRequest,
    ) -> Result<StoreOutcome, StorageError> {
        let name = upload_name(&req.filename)?;
        validate_metadata(&req.metadata)?;
        let storage_override = StorageOverride::parse_optional(req.storage_override.as_deref())?;

        let supplied_mime = req
            .mime_type
            .as_deref()
            .map(essence)
            .filter(|m| !m.is_empty());
        let (mime, staged) = match supplied_mime {
            Some(mime) => (mime, stage_stream(reader, &self.config.staging_dir())?),
            None => {
                let mut reader = reader;
                let mut head = Vec::with_capacity(SNIFF_LEN);
                (&mut reader).take(SNIFF_LEN as u64).read_to_end(&mut head)?;
                let mime = detect_content_type(&head, &name);
                let chained = Cursor::new(head).chain(reader);
                (mime, stage_stream(chained, &self.config.staging_dir())?)
            }
        };

        if let Some(declared) = req.declared_size {
            if declared != staged.size() {
                tracing::warn!(
                    filename = %name,
                    declared,
                    measured = staged.size(),
                    "Declared size does not match received bytes"
                );
            }
        }

        let mut journal = self.journal.lock();

        if let Some(mut existing) = self.index.find_by_hash(staged.hash()) {
            drop(staged);
            if existing.is_deleted() {
                existing.deleted_at = None;
                journal.append(&WalEntry::FileUpserted {
                    file: existing.clone(),
                })?;
                self.index.upsert(existing.clone());
                self.audit.record(
                    AuditTrail::Deletion,
                    &[json!({
                        "action": "restore",
                        "reason": "reupload",
                        "id": existing.id,
                        "hash": existing.hash,
                        "timestamp": Utc::now(),
                    })],
                );
            }
            tracing::debug!(
                id = %existing.id,
                hash = %existing.hash,
                filename = %name,
                "Duplicate upload, returning existing entry"
            );
            return Ok(StoreOutcome {
                file: existing,
                duplicate: true,
                detected_mime: mime,
                rule_id: None,
            });
        }

        let class = self.classifier.classify(
            &mime,
            &name,
            req.category_hint.as_deref(),
            storage_override,
        );
        let hash = staged.hash().to_string();
        let size = staged.size();

        let mut rel_path = stored_path(&class.category, &hash, &name);
        if self.index.path_refcount(&rel_path) > 0 {
            // 12-hex prefix collision with different content under the same name.
            rel_path = format!("{}/{}_{}", class.category, hash, sanitize_filename(&name));
        }
        let dest = self.storage_path(&rel_path);
        staged.persist(&dest)?;

        let meta = FileMetadata {
            id: hash.clone(),
            hash,
            stored_path: rel_path,
            original_name: name,
            category: class.category,
            mime_type: class.detected_mime.clone(),
            media_type: class.media_type,
            size,
            uploaded_at: Utc::now(),
            deleted_at: None,
            metadata: req.metadata,
            is_hard_link: false,
            linked_to: None,
        };

        if let Err(e) = journal.append(&WalEntry::FileUpserted { file: meta.clone() }) {
            let _ = std::fs::remove_file(&dest);
            self.cleanup_empty_dirs(&dest);
            return Err(e.into());
        }
        self.index.upsert(meta.clone());
        drop(journal);

        tracing::info!(
            id = %meta.id,
            category = %meta.category,
            size = meta.size,
            mime = %meta.mime_type,
            "File stored"
        );

        Ok(StoreOutcome {
            file: meta,
            duplicate: false,
            detected_mime: class.detected_mime,
            rule_id: class.rule_id,
        })
    }
}
