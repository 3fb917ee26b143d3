use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Bytes written to the staging area together with their digest. The
/// staged file is removed on drop unless it was persisted.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    hash: String,
    size: u64,
    persisted: bool,
}

impl StagedFile {
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Atomically rename the staged bytes to `dest`.
    pub fn persist(mut self, dest: &Path) -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&self.path, dest)?;
        self.persisted = true;
        Ok(())
    }

    /// Persist unless `dest` already holds the same content; returns whether
    /// bytes were written.
    pub fn persist_if_absent(self, dest: &Path) -> std::io::Result<bool> {
        if dest.exists() {
            return Ok(false);
        }
        self.persist(dest)?;
        Ok(true)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}

/// Stream `reader` into a new file under `staging_dir`, hashing in the same pass.
pub fn stage_stream<R: Read>(mut reader: R, staging_dir: &Path) -> Result<StagedFile, StorageError> {
    std::fs::create_dir_all(staging_dir)?;
    let path = staging_dir.join(format!(".upload_{}", uuid::Uuid::new_v4().simple()));
    let mut file = File::create(&path)?;

    // From here on the guard owns cleanup of the partial file.
    let mut staged = StagedFile {
        path,
        hash: String::new(),
        size: 0,
        persisted: false,
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n])?;
        staged.size += n as u64;
    }
    file.sync_all()?;

    staged.hash = hex::encode(hasher.finalize());
    Ok(staged)
}
