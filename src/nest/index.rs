//! Symbolic loop indices and the iteration space they span.

use crate::utils::intern::{intern, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a symbolic index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u64);

impl IndexId {
    fn fresh() -> Self {
        IndexId(NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One dimension of an iteration space.
///
/// Two indices are equal only if they are the same index; two indices created
/// with the same name are still distinct.
#[derive(Clone, Copy)]
pub struct SymbolicIndex {
    id: IndexId,
    name: Symbol,
}

impl SymbolicIndex {
    /// Create a fresh index with the given display name.
    pub fn new(name: &str) -> Self {
        Self {
            id: IndexId::fresh(),
            name: intern(name),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> Symbol {
        self.name
    }
}

impl PartialEq for SymbolicIndex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SymbolicIndex {}

impl Hash for SymbolicIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SymbolicIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

impl fmt::Display for SymbolicIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A rectangular iteration space: one `(extent, index)` pair per dimension,
/// outermost first.
#[derive(Debug, Clone)]
pub struct IterationSpace {
    shape: Vec<(usize, SymbolicIndex)>,
}

impl IterationSpace {
    /// Create a space with one fresh index per `(name, extent)` pair.
    pub fn new(dims: &[(&str, usize)]) -> Self {
        let shape = dims
            .iter()
            .map(|&(name, extent)| (extent, SymbolicIndex::new(name)))
            .collect();
        Self { shape }
    }

    /// Create an anonymous space with indices named `i0`, `i1`, ...
    pub fn with_extents(extents: &[usize]) -> Self {
        let shape = extents
            .iter()
            .enumerate()
            .map(|(d, &extent)| (extent, SymbolicIndex::new(&format!("i{}", d))))
            .collect();
        Self { shape }
    }

    pub fn shape(&self) -> &[(usize, SymbolicIndex)] {
        &self.shape
    }

    pub fn indices(&self) -> Vec<SymbolicIndex> {
        self.shape.iter().map(|(_, idx)| *idx).collect()
    }

    /// The index of dimension `d`.
    pub fn index(&self, d: usize) -> Option<SymbolicIndex> {
        self.shape.get(d).map(|(_, idx)| *idx)
    }

    pub fn dim(&self) -> usize {
        self.shape.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_equality() {
        let a = SymbolicIndex::new("i");
        let b = SymbolicIndex::new("i");
        assert_ne!(a, b);
        assert_eq!(a, a);

        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_iteration_space() {
        let space = IterationSpace::new(&[("i", 64), ("j", 32)]);
        assert_eq!(space.dim(), 2);
        assert_eq!(space.shape()[1].0, 32);
        assert_eq!(space.index(0).map(|i| i.to_string()), Some("i".to_string()));
        assert!(space.index(2).is_none());
    }
}
