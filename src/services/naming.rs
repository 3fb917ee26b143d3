//! Name and category rules shared by store, rename, move and copy.

use crate::error::StorageError;

const HASH_PREFIX_LEN: usize = 12;
const MAX_FILENAME_LEN: usize = 200;
const MAX_SEGMENT_LEN: usize = 64;

/// Validate a user-chosen new name. Anything that could address another
/// directory is rejected outright.
pub fn validate_new_name(name: &str) -> Result<String, StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidFilename("name is empty".into()));
    }
    if trimmed.contains("..") || trimmed.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidFilename(format!(
            "'{}' contains a path separator or traversal",
            name
        )));
    }
    Ok(trimmed.to_string())
}

/// Reduce an upload filename to its last component. Clients routinely send
/// full paths, so separators are stripped instead of rejected here.
pub fn upload_name(filename: &str) -> Result<String, StorageError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('\0', "");
    if base.is_empty() || base == "." || base == ".." {
        return Err(StorageError::InvalidFilename(format!(
            "'{}' has no usable file name",
            filename
        )));
    }
    Ok(base)
}

/// Filesystem-safe rendition of a name for the physical file.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let truncated: String = cleaned.chars().take(MAX_FILENAME_LEN).collect();
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

/// Lowercase `[a-z0-9_-]` slug, `None` when nothing usable remains.
pub fn sanitize_segment(segment: &str) -> Option<String> {
    let slug: String = segment
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            ' ' | '.' => '_',
            _ => '_',
        })
        .take(MAX_SEGMENT_LEN)
        .collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

/// Validate and normalize a category path such as `images/Holiday 2024`.
pub fn normalize_category(category: &str) -> Result<String, StorageError> {
    let mut segments = Vec::new();
    for raw in category.split(['/', '\\']) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if raw == ".." || raw == "." {
            return Err(StorageError::InvalidCategory(format!(
                "'{}' contains a traversal segment",
                category
            )));
        }
        let segment = sanitize_segment(raw).ok_or_else(|| {
            StorageError::InvalidCategory(format!("'{}' has an unusable segment", category))
        })?;
        segments.push(segment);
    }
    if segments.is_empty() {
        return Err(StorageError::InvalidCategory("category is empty".into()));
    }
    Ok(segments.join("/"))
}

pub fn stored_file_name(hash: &str, name: &str) -> String {
    let prefix = &hash[..HASH_PREFIX_LEN.min(hash.len())];
    format!("{}_{}", prefix, sanitize_filename(name))
}

/// `<category>/<hash12>_<sanitized name>`.
pub fn stored_path(category: &str, hash: &str, name: &str) -> String {
    format!("{}/{}", category, stored_file_name(hash, name))
}
