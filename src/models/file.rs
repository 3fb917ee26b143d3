use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::value::MetadataValue;

/// Coarse media family used for default placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Document,
    Code,
    Archive,
    Other,
}

impl MediaType {
    /// Top-level storage bucket for this media family.
    pub fn bucket(self) -> &'static str {
        match self {
            MediaType::Image => "images",
            MediaType::Video => "videos",
            MediaType::Audio => "audio",
            MediaType::Document => "documents",
            MediaType::Code => "code",
            MediaType::Archive => "archives",
            MediaType::Other => "other",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Document => "document",
            MediaType::Code => "code",
            MediaType::Archive => "archive",
            MediaType::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub hash: String,
    /// Relative to the storage root, always with forward slashes.
    pub stored_path: String,
    pub original_name: String,
    pub category: String,
    pub mime_type: String,
    pub media_type: MediaType,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub is_hard_link: bool,
    pub linked_to: Option<String>,
}

impl FileMetadata {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Lowercased extension of the original name, without the dot.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.original_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Everything `store_file` needs besides the byte stream.
#[derive(Debug, Clone, Default)]
pub struct StoreRequest {
    pub filename: String,
    pub mime_type: Option<String>,
    /// Size announced by the client; the measured size wins.
    pub declared_size: Option<u64>,
    pub metadata: BTreeMap<String, String>,
    pub category_hint: Option<String>,
    /// Raw `auto|image|video|audio|document|code` value, validated by the classifier.
    pub storage_override: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub file: FileMetadata,
    pub duplicate: bool,
    pub detected_mime: String,
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub id: String,
    pub soft: bool,
    pub space_reclaimed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteItem {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
    pub space_reclaimed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDeleteResult {
    pub results: Vec<BatchDeleteItem>,
    pub total_deleted: usize,
    pub total_failed: usize,
    pub space_reclaimed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub id: String,
    pub new_category: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyRequest {
    pub id: String,
    pub new_name: Option<String>,
    pub new_category: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub hard_link: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCopyItem {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
    pub file: Option<FileMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCopyResult {
    pub results: Vec<BatchCopyItem>,
    pub total_copied: usize,
    pub total_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub count: usize,
    pub files: Vec<FileMetadata>,
    pub total_wasted: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryStats {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub active_files: usize,
    pub deleted_files: usize,
    pub hard_links: usize,
    pub unique_hashes: usize,
    pub logical_bytes: u64,
    /// Bytes on disk, counting shared stored paths once.
    pub physical_bytes: u64,
    pub categories: BTreeMap<String, CategoryStats>,
}

// ---- HTTP request bodies ----

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub new_name: String,
    #[serde(default)]
    pub update_stored_file: bool,
}

#[derive(Debug, Deserialize)]
pub struct MoveFileRequest {
    pub new_category: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CopyFileRequest {
    pub new_name: Option<String>,
    pub new_category: Option<String>,
    pub metadata: Option<BTreeMap<String, MetadataValue>>,
    #[serde(default)]
    pub hard_link: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub soft: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchMoveRequest {
    pub moves: Vec<MoveRequest>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCopyRequest {
    pub copies: Vec<CopyRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMetadataRequest {
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Merge into the existing map instead of replacing it.
    #[serde(default = "default_merge")]
    pub merge: bool,
}

fn default_merge() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct IngestFileRequest {
    /// Path relative to the server-side inbox.
    pub path: String,
    /// Stored name; defaults to the last path component.
    pub filename: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
    pub category_hint: Option<String>,
    pub storage_override: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub files: Vec<IngestFileRequest>,
    /// Worker count for this batch; the configured default when absent.
    pub workers: Option<usize>,
}
