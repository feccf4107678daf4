//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to inspect {path}: {source}")]
    Lookup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache path is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Could not create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Publish failed for {path}: {source}")]
    PublishFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Discard failed: {0}")]
    DiscardFailed(#[source] std::io::Error),
}

impl StorageError {
    pub fn lookup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Lookup {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure happened while preparing directories.
    pub fn is_create_dir(&self) -> bool {
        matches!(self, Self::CreateDir { .. })
    }
}
