//! Request path matching for `/{width}p/{filename}`.

use std::sync::LazyLock;

use regex::Regex;

use crate::key::{KeyError, KeyResult, RequestKey};
use crate::width::{Width, WidthSet};

static ROUTE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(\d+)p/(.+)$").expect("route pattern is valid"));

/// Turns request paths into validated [`RequestKey`]s.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    widths: WidthSet,
}

impl PathMatcher {
    /// Create a matcher accepting only the given widths.
    pub fn new(widths: WidthSet) -> Self {
        Self { widths }
    }

    /// Match a raw (percent-encoded) request path.
    ///
    /// Route mismatch yields [`KeyError::NoMatch`]; a bad width or filename
    /// yields the corresponding client error.
    pub fn match_path(&self, raw_path: &str) -> KeyResult<RequestKey> {
        let decoded = urlencoding::decode(raw_path)
            .map_err(|_| KeyError::UnsafePath(raw_path.to_string()))?;

        let captures = ROUTE_PATTERN.captures(&decoded).ok_or(KeyError::NoMatch)?;
        let width_str = &captures[1];
        let filename = &captures[2];

        let width = width_str
            .parse::<u32>()
            .map(Width)
            .map_err(|_| KeyError::InvalidWidth(width_str.to_string()))?;

        if !self.widths.contains(width) {
            return Err(KeyError::InvalidWidth(width_str.to_string()));
        }

        RequestKey::new(width, filename)
    }
}
