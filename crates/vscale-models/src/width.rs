//! Target output widths.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Target output width in pixels. Height follows the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Width(pub u32);

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Width {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The set of widths a deployment is willing to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidthSet(BTreeSet<Width>);

impl WidthSet {
    /// Build a set from raw pixel widths.
    pub fn new<I>(widths: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self(widths.into_iter().map(Width).collect())
    }

    /// Check whether a width is permitted.
    pub fn contains(&self, width: Width) -> bool {
        self.0.contains(&width)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Width> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for WidthSet {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_set_membership() {
        let set = WidthSet::new([720, 480, 720]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Width(480)));
        assert!(!set.contains(Width(360)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Width(480), Width(720)]);
    }

    #[test]
    fn test_width_serde_transparent() {
        let width: Width = serde_json::from_str("1080").unwrap();
        assert_eq!(width, Width(1080));
        assert_eq!(serde_json::to_string(&width).unwrap(), "1080");
    }
}
