use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    pub version: u32,
    pub hash: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub comment: String,
    pub filename: String,
    pub mime_type: String,
    pub is_current: bool,
}

/// A version chain. `versions` is kept oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedFile {
    pub file_id: String,
    pub current_version: u32,
    pub total_versions: u32,
    pub versions: Vec<FileVersion>,
}

impl VersionedFile {
    pub fn new(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            current_version: 0,
            total_versions: 0,
            versions: Vec::new(),
        }
    }

    pub fn get(&self, version: u32) -> Option<&FileVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Append `version` as the new current one.
    pub fn push(&mut self, mut version: FileVersion) {
        for v in &mut self.versions {
            v.is_current = false;
        }
        version.is_current = true;
        self.current_version = version.version;
        self.versions.push(version);
        self.total_versions = self.versions.len() as u32;
    }

    pub fn next_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1
    }
}

/// Attributes of a new version besides its content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewVersion {
    #[serde(default)]
    pub filename: String,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub uploaded_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub file_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub content_changed: bool,
    pub size_delta: i64,
    pub time_elapsed_secs: i64,
    pub uploader_changed: bool,
    pub filename_changed: bool,
    pub mime_type_changed: bool,
    pub comment_changed: bool,
    pub from: FileVersion,
    pub to: FileVersion,
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub uploaded_by: String,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: u32,
    pub to: u32,
}
