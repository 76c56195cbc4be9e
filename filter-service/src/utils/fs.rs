//! Filesystem helpers shared across modules.
//!
//! Every helper attaches the operation and path to IO errors.

use std::io::ErrorKind;
use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Create a directory that must not exist yet.
pub async fn create_dir_exclusive(path: &Path) -> Result<()> {
    tokio::fs::create_dir(path)
        .await
        .map_err(|e| Error::io_path("creating scratch directory", path, e))
}

/// Remove a directory tree. Returns `false` if it was already gone.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_path("removing directory", path, e)),
    }
}

/// Number of direct subdirectories and their total file size in bytes.
pub async fn dir_usage(path: &Path) -> Result<(usize, u64)> {
    let mut dirs = 0usize;
    let mut bytes = 0u64;

    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(Error::io_path("reading directory", path, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("reading directory", path, e))?
    {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        dirs += 1;

        let Ok(mut files) = tokio::fs::read_dir(entry.path()).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            if let Ok(meta) = file.metadata().await
                && meta.is_file()
            {
                bytes += meta.len();
            }
        }
    }

    Ok((dirs, bytes))
}
