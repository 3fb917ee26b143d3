use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StorageError;

pub const MAX_METADATA_KEYS: usize = 64;
pub const MAX_METADATA_KEY_LEN: usize = 128;
pub const MAX_METADATA_VALUE_LEN: usize = 1024;

/// A user supplied metadata value as it arrives over JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Render for the stored string map. Strings are kept verbatim,
    /// scalars use their JSON text and containers are compact JSON.
    pub fn render(&self) -> String {
        match self {
            MetadataValue::String(s) => s.clone(),
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::List(_) | MetadataValue::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

/// Flatten boundary values into the stored map, enforcing the limits.
pub fn flatten_metadata(
    values: BTreeMap<String, MetadataValue>,
) -> Result<BTreeMap<String, String>, StorageError> {
    let flat: BTreeMap<String, String> = values
        .into_iter()
        .map(|(k, v)| {
            let rendered = v.render();
            (k, rendered)
        })
        .collect();
    validate_metadata(&flat)?;
    Ok(flat)
}

pub fn validate_metadata(map: &BTreeMap<String, String>) -> Result<(), StorageError> {
    if map.len() > MAX_METADATA_KEYS {
        return Err(StorageError::InvalidMetadata(format!(
            "{} keys exceeds the limit of {}",
            map.len(),
            MAX_METADATA_KEYS
        )));
    }
    for (key, value) in map {
        if key.trim().is_empty() {
            return Err(StorageError::InvalidMetadata("empty key".into()));
        }
        if key.len() > MAX_METADATA_KEY_LEN {
            return Err(StorageError::InvalidMetadata(format!(
                "key '{}...' longer than {} bytes",
                &key[..key.char_indices().nth(16).map(|(i, _)| i).unwrap_or(key.len())],
                MAX_METADATA_KEY_LEN
            )));
        }
        if value.len() > MAX_METADATA_VALUE_LEN {
            return Err(StorageError::InvalidMetadata(format!(
                "value for '{}' longer than {} bytes",
                key, MAX_METADATA_VALUE_LEN
            )));
        }
    }
    Ok(())
}
