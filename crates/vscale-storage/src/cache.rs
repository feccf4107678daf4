//! Transcode cache manager.
//!
//! Published artifacts live at `<root>/<width>/<filename>`. In-progress
//! artifacts are created under `<root>/.staging/`, which no key can map to,
//! and reach their canonical path only through a rename on the same
//! filesystem. A reader therefore sees either nothing or a complete file.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use vscale_models::RequestKey;

/// Directory under the output root holding temporary artifacts.
pub const STAGING_DIR: &str = ".staging";

/// Mode of published artifacts, matching a file the encoder created itself.
#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o644;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// A complete artifact exists at this path.
    Ready(PathBuf),
    /// Nothing has been published for the key.
    Missing,
}

/// A temporary artifact waiting to be published or discarded.
///
/// Dropping it without calling [`CacheManager::publish`] removes the file.
#[derive(Debug)]
pub struct StagedArtifact {
    key: RequestKey,
    canonical: PathBuf,
    temp: TempPath,
}

impl StagedArtifact {
    /// Where the encoder should write.
    pub fn path(&self) -> &Path {
        &self.temp
    }
}

/// Manages the output directory tree.
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Create a manager rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Canonical location of a key's artifact. No I/O.
    pub fn locate(&self, key: &RequestKey) -> PathBuf {
        self.root
            .join(key.width().to_string())
            .join(key.filename())
    }

    /// Check whether a complete artifact exists for `key`.
    pub async fn lookup(&self, key: &RequestKey) -> StorageResult<CacheLookup> {
        let path = self.locate(key);

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(CacheLookup::Ready(path)),
            Ok(_) => Err(StorageError::NotAFile(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CacheLookup::Missing),
            Err(e) => Err(StorageError::lookup(path, e)),
        }
    }

    /// Prepare directories and reserve a uniquely named temporary artifact.
    pub async fn stage(&self, key: &RequestKey) -> StorageResult<StagedArtifact> {
        let canonical = self.locate(key);
        if let Some(parent) = canonical.parent() {
            create_dir(parent).await?;
        }

        let staging = self.staging_dir();
        create_dir(&staging).await?;

        let file = tempfile::Builder::new()
            .prefix("partial-")
            .tempfile_in(&staging)
            .map_err(|e| StorageError::create_dir(&staging, e))?;

        // Temp files start out owner-only and publishing keeps the inode.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))
                .map_err(|e| StorageError::create_dir(&staging, e))?;
        }

        let temp = file.into_temp_path();

        debug!(key = %key, temp = %temp.display(), "Staged artifact");

        Ok(StagedArtifact {
            key: key.clone(),
            canonical,
            temp,
        })
    }

    /// Check that a temporary artifact can be created under the staging
    /// directory. The file is unnamed and gone once dropped.
    pub async fn check_writable(&self) -> StorageResult<()> {
        let staging = self.staging_dir();
        create_dir(&staging).await?;

        let dir = staging.clone();
        let created = tokio::task::spawn_blocking(move || tempfile::tempfile_in(&dir)).await;

        match created {
            Ok(Ok(_file)) => Ok(()),
            Ok(Err(e)) => Err(StorageError::create_dir(staging, e)),
            Err(e) => Err(StorageError::create_dir(staging, io::Error::other(e))),
        }
    }

    /// Atomically move a staged artifact onto its canonical path.
    ///
    /// An existing artifact is replaced; the last publisher wins.
    pub async fn publish(&self, staged: StagedArtifact) -> StorageResult<CacheLookup> {
        let StagedArtifact {
            key,
            canonical,
            temp,
        } = staged;

        // The parent may have been pruned while the job ran.
        if let Some(parent) = canonical.parent() {
            create_dir(parent).await?;
        }

        let target = canonical.clone();
        let persisted = tokio::task::spawn_blocking(move || temp.persist(&target)).await;

        match persisted {
            Ok(Ok(())) => {
                info!(key = %key, path = %canonical.display(), "Published cache artifact");
                Ok(CacheLookup::Ready(canonical))
            }
            // The returned TempPath is dropped here, removing the temp file.
            Ok(Err(e)) => Err(StorageError::PublishFailed {
                path: canonical,
                source: e.error,
            }),
            Err(e) => Err(StorageError::PublishFailed {
                path: canonical,
                source: io::Error::other(e),
            }),
        }
    }

    /// Remove a staged artifact. Tolerates a file that is already gone.
    pub async fn discard(&self, staged: StagedArtifact) -> StorageResult<()> {
        let key = staged.key;
        let temp = staged.temp;

        let removed = tokio::task::spawn_blocking(move || temp.close()).await;

        match removed {
            Ok(Ok(())) => {
                debug!(key = %key, "Discarded staged artifact");
                Ok(())
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Ok(Err(e)) => {
                warn!(key = %key, "Failed to discard staged artifact: {}", e);
                Err(StorageError::DiscardFailed(e))
            }
            Err(e) => Err(StorageError::DiscardFailed(io::Error::other(e))),
        }
    }
}

async fn create_dir(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::create_dir(path, e))
}
