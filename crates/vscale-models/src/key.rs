//! Request keys and filename normalization.
//!
//! A [`RequestKey`] names one cache entry: a permitted width plus a filename
//! relative to the input root. Construction goes through
//! [`normalize_filename`], so a key can never point outside the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::width::Width;

/// Result type for key construction.
pub type KeyResult<T> = Result<T, KeyError>;

/// Reasons a request path does not yield a usable key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Path does not have the `/{width}p/{filename}` shape.
    #[error("Not Found")]
    NoMatch,

    /// Width is unparsable or not in the configured set.
    #[error("Invalid Width")]
    InvalidWidth(String),

    /// Filename is absolute, empty, or escapes the input root.
    #[error("Invalid file path")]
    UnsafePath(String),
}

/// Identifies a cache entry: (width, relative filename).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    width: Width,
    filename: PathBuf,
}

impl RequestKey {
    /// Create a key, normalizing the filename.
    pub fn new(width: Width, filename: &str) -> KeyResult<Self> {
        Ok(Self {
            width,
            filename: normalize_filename(filename)?,
        })
    }

    pub fn width(&self) -> Width {
        self.width
    }

    /// Normalized filename, always relative and free of `.`/`..` segments.
    pub fn filename(&self) -> &Path {
        &self.filename
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p/{}", self.width, self.filename.display())
    }
}

/// Lexically normalize a requested filename.
///
/// `.` segments are dropped and `..` removes the previous segment. The result
/// is rejected when it is absolute, when a `..` would climb above the root,
/// when nothing is left, or when it contains a NUL byte.
pub fn normalize_filename(raw: &str) -> KeyResult<PathBuf> {
    if raw.contains('\0') {
        return Err(KeyError::UnsafePath(raw.to_string()));
    }

    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(raw).components() {
        match component {
            Component::Normal(segment) => {
                normalized.push(segment);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(KeyError::UnsafePath(raw.to_string()));
                }
                normalized.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(KeyError::UnsafePath(raw.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(KeyError::UnsafePath(raw.to_string()));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_and_nested() {
        assert_eq!(normalize_filename("movie.mp4").unwrap(), PathBuf::from("movie.mp4"));
        assert_eq!(
            normalize_filename("shows/s01/e01.mp4").unwrap(),
            PathBuf::from("shows/s01/e01.mp4")
        );
    }

    #[test]
    fn test_normalize_resolves_dot_segments() {
        assert_eq!(normalize_filename("./a/./b.mp4").unwrap(), PathBuf::from("a/b.mp4"));
        assert_eq!(normalize_filename("a/x/../b.mp4").unwrap(), PathBuf::from("a/b.mp4"));
        assert_eq!(normalize_filename("a//b.mp4").unwrap(), PathBuf::from("a/b.mp4"));
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        for raw in ["../secret.mp4", "..", "a/../../b.mp4", "a/b/../../../etc/passwd"] {
            assert!(
                matches!(normalize_filename(raw), Err(KeyError::UnsafePath(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_normalize_rejects_absolute_and_empty() {
        assert!(matches!(normalize_filename("/etc/passwd"), Err(KeyError::UnsafePath(_))));
        assert!(matches!(normalize_filename("."), Err(KeyError::UnsafePath(_))));
        assert!(matches!(normalize_filename("a/.."), Err(KeyError::UnsafePath(_))));
        assert!(matches!(normalize_filename("a\0b.mp4"), Err(KeyError::UnsafePath(_))));
    }

    #[test]
    fn test_key_display() {
        let key = RequestKey::new(Width(480), "dir/./movie.mp4").unwrap();
        assert_eq!(key.to_string(), "480p/dir/movie.mp4");
        assert_eq!(key.width(), Width(480));
    }
}
