use crate::error::AppError;
use std::path::{Component, Path, PathBuf};

/// Normalize a client-supplied path relative to the ingest inbox.
/// Traversal is refused; leading slashes and `.` segments are dropped.
pub fn validate_relative_path(rel_path: &str) -> Result<String, AppError> {
    if rel_path.trim().is_empty() {
        return Err(AppError::BadRequest("Empty path".into()));
    }
    if rel_path.contains('\0') {
        return Err(AppError::BadRequest("Null bytes not allowed in path".into()));
    }

    let normalized = rel_path.replace('\\', "/");
    let path = Path::new(&normalized);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(AppError::Forbidden("Path traversal not allowed".into()));
            }
            Component::Normal(s) => clean.push(s),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }

    let result = clean.to_string_lossy().to_string();
    if result.is_empty() {
        return Err(AppError::BadRequest("Path resolves to empty".into()));
    }
    Ok(result)
}

/// Resolve `rel_path` inside `inbox` and make sure the target is a regular
/// file that does not escape it through a symlink.
pub fn resolve_inbox_file(inbox: &Path, rel_path: &str) -> Result<PathBuf, AppError> {
    let clean = validate_relative_path(rel_path)?;
    let resolved = inbox.join(&clean);
    let canon_root = inbox.canonicalize()?;
    let canon_resolved = resolved
        .canonicalize()
        .map_err(|_| AppError::BadRequest(format!("{} does not exist in the inbox", clean)))?;

    if !canon_resolved.starts_with(&canon_root) {
        return Err(AppError::Forbidden("Path escapes the inbox".into()));
    }
    if !canon_resolved.is_file() {
        return Err(AppError::BadRequest(format!("{} is not a regular file", clean)));
    }
    Ok(canon_resolved)
}
