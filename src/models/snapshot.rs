use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::file::FileMetadata;
use super::version::VersionedFile;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub files: HashMap<String, FileMetadata>,
    pub versions: HashMap<String, VersionedFile>,
}
