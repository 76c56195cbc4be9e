//! Per-job scratch directories.
//!
//! Each submission gets an exclusive directory under the scratch root holding
//! its input and, once finished, its output. Directories are reclaimed by the
//! retention purge and, unconditionally, on shutdown.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::utils::fs::{
    create_dir_exclusive, dir_usage, ensure_dir_all_with_op, remove_dir_all_if_exists,
};

/// An allocated scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside this directory.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Scratch space usage.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScratchUsage {
    pub directories: usize,
    pub bytes: u64,
}

/// Temp resource manager.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the scratch root.
    pub async fn init(&self) -> Result<()> {
        ensure_dir_all_with_op("creating scratch root", &self.root).await?;
        info!("Scratch space ready at {}", self.root.display());
        Ok(())
    }

    /// Allocate a fresh, exclusive directory.
    pub async fn allocate(&self) -> Result<ScratchDir> {
        let path = self.root.join(Uuid::new_v4().to_string());
        create_dir_exclusive(&path).await?;
        debug!("Allocated scratch directory {}", path.display());
        Ok(ScratchDir { path })
    }

    /// Remove a directory and everything in it. Already-removed is fine.
    ///
    /// Paths outside the scratch root are refused.
    pub async fn release(&self, dir: &Path) -> Result<bool> {
        if !self.owns(dir) {
            warn!("Refusing to release {} outside scratch root", dir.display());
            return Ok(false);
        }
        let removed = remove_dir_all_if_exists(dir).await?;
        if removed {
            debug!("Released scratch directory {}", dir.display());
        }
        Ok(removed)
    }

    /// Remove every allocated directory under the root. Used on startup and
    /// shutdown. Entries not created by [`allocate`](Self::allocate) are left alone.
    pub async fn cleanup_all(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(crate::Error::io_path("reading scratch root", &self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| crate::Error::io_path("reading scratch root", &self.root, e))?
        {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir || !is_allocated_name(&path) {
                continue;
            }
            match remove_dir_all_if_exists(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Scratch cleanup: {}", e),
            }
        }

        info!("Scratch cleanup removed {} entries", removed);
        Ok(removed)
    }

    pub async fn usage(&self) -> Result<ScratchUsage> {
        let (directories, bytes) = dir_usage(&self.root).await?;
        Ok(ScratchUsage { directories, bytes })
    }

    fn owns(&self, dir: &Path) -> bool {
        dir.parent() == Some(self.root.as_path())
    }
}

fn is_allocated_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| Uuid::parse_str(n).is_ok())
}
