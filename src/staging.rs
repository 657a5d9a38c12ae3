//! Allocates ephemeral scratch directories for a staged update and guarantees their cleanup,
//! the same scoped-acquisition idiom the teacher's `lock.rs` uses for lock files: a `Drop` impl
//! removes the resource on every exit path instead of relying on the caller remembering to.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;

use crate::digest::DigestAlgorithm;
use crate::error::Result;

/// Allocates object-scoped temp directories under one staging root. Staging directories are
/// siblings of each other, never nested inside an object root, so a crash mid-install can never
/// leave a half-written object looking like it has extra, unexplained content.
pub struct StagingManager {
    staging_root: PathBuf,
    counter: AtomicU64,
}

impl StagingManager {
    /// `staging_root` is created if it does not already exist.
    pub fn new(staging_root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(&staging_root)?;
        Ok(Self {
            staging_root: staging_root.as_ref().to_path_buf(),
            counter: AtomicU64::new(0),
        })
    }

    /// Returns a fresh, empty directory scoped to `object_id`. The caller must keep the
    /// returned `StagingDir` alive for the duration of the staged update; it is removed, and
    /// everything under it, when the guard is dropped.
    pub fn create_object_temp_dir(&self, object_id: &str) -> Result<StagingDir> {
        let hash = DigestAlgorithm::Sha256.hash_hex(&mut object_id.as_bytes())?;
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);
        let dir_name = format!("{}-{}", hash, sequence);

        let path = self.staging_root.join(dir_name);
        fs::create_dir_all(&path)?;

        Ok(StagingDir { path })
    }
}

/// A staging directory, removed on drop regardless of whether the staged update succeeded,
/// failed, or was cancelled.
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to remove staging directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
