//! Per-index scheduling tags, kept for diagnostics.

use crate::nest::SymbolicIndex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A scheduling attribute attached to an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAttr {
    Unrolled,
    Vectorized,
    Parallelized,
    Cache,
    Trigger,
}

impl IndexAttr {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexAttr::Unrolled => "unrolled",
            IndexAttr::Vectorized => "vectorized",
            IndexAttr::Parallelized => "parallelized",
            IndexAttr::Cache => "cache",
            IndexAttr::Trigger => "trigger",
        }
    }
}

impl fmt::Display for IndexAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records which attributes were applied to which index, in call order.
#[derive(Debug, Clone, Default)]
pub struct IndexAttributeTracker {
    attrs: HashMap<SymbolicIndex, Vec<IndexAttr>>,
}

impl IndexAttributeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, index: SymbolicIndex, attr: IndexAttr) {
        self.attrs.entry(index).or_default().push(attr);
    }

    /// Attributes of `index`; empty if none were recorded.
    pub fn get(&self, index: &SymbolicIndex) -> &[IndexAttr] {
        self.attrs.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, index: &SymbolicIndex, attr: IndexAttr) -> bool {
        self.get(index).contains(&attr)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker() {
        let i = SymbolicIndex::new("i");
        let j = SymbolicIndex::new("j");
        let mut tracker = IndexAttributeTracker::new();
        tracker.add(i, IndexAttr::Cache);
        tracker.add(i, IndexAttr::Unrolled);

        assert_eq!(tracker.get(&i), &[IndexAttr::Cache, IndexAttr::Unrolled]);
        assert!(tracker.get(&j).is_empty());
        assert!(tracker.has(&i, IndexAttr::Unrolled));
        assert!(!tracker.has(&i, IndexAttr::Vectorized));
    }
}
