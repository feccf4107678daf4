//! Shared data models for the vscale transcoding server.
//!
//! This crate provides:
//! - Target widths and the configured width set
//! - Request keys identifying a cache entry
//! - Filename normalization that keeps requests inside the input root
//! - The request path matcher (`/{width}p/{filename}`)

pub mod key;
pub mod matcher;
pub mod width;

pub use key::{normalize_filename, KeyError, KeyResult, RequestKey};
pub use matcher::PathMatcher;
pub use width::{Width, WidthSet};
