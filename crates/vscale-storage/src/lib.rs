//! On-disk cache of transcoded artifacts.
//!
//! This crate provides:
//! - Canonical artifact locations (`<output_root>/<width>/<filename>`)
//! - Existence lookups that never observe partial files
//! - Staging of temporary artifacts on the same filesystem
//! - Atomic publication by rename, and idempotent discard

pub mod cache;
pub mod error;

pub use cache::{CacheLookup, CacheManager, StagedArtifact, STAGING_DIR};
pub use error::{StorageError, StorageResult};
