// ── Filesystem helpers ──

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

/// Replace `path` with `contents` so readers only ever see the old or the
/// new file: write a sibling temp file, then rename over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| CoreError::Internal(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| CoreError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CoreError::io(path, e));
    }
    Ok(())
}

/// Create `path` and any missing parents. Fails if a non-directory is in
/// the way.
pub async fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CoreError::io(path, e))
}

/// Read a file, mapping absence to `None`.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Remove a file; already-absent is success.
pub async fn remove_file_if_exists(path: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// A missing directory counts as empty.
pub async fn dir_is_empty(path: &Path) -> Result<bool, CoreError> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(CoreError::io(path, e)),
    };
    let first = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::io(path, e))?;
    Ok(first.is_none())
}

// ── Advisory locks ───────────────────────────────────────────────────

/// Exclusive advisory lock on a file, released on drop.
///
/// Serialises every process that shares a base directory. Within one
/// process, callers still take an in-memory mutex first so waiting tasks
/// do not tie up blocking threads.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `path` is ours, creating the file and its
    /// parent directory if needed.
    pub async fn acquire(path: &Path) -> Result<Self, CoreError> {
        if let Some(dir) = path.parent() {
            ensure_dir(dir).await?;
        }
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| CoreError::io(&path, e))?;
            FileExt::lock_exclusive(&file).map_err(|e| CoreError::io(&path, e))?;
            debug!(path = %path.display(), "lock acquired");
            Ok(Self { file, path })
        })
        .await
        .map_err(|e| CoreError::Internal(format!("lock task failed: {e}")))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}
