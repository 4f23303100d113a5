//! Buffer references used as cache sources and packing targets.

use crate::utils::intern::{intern, Symbol};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARRAY_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayId(pub u64);

/// How a buffer participates in the nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only argument
    Input,
    /// Argument that is read and written
    InputOutput,
    /// Write-only argument
    Output,
    /// Constant data known at build time
    Const,
    /// Scratch storage local to the nest
    Temp,
}

impl Role {
    /// Whether a cache of this buffer may be filled ahead of its use.
    pub fn allows_multicache(&self) -> bool {
        matches!(self, Role::Const | Role::Input)
    }
}

/// Element layout of a buffer or cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Row-major
    FirstMajor,
    /// Column-major
    LastMajor,
    /// Explicit dimension order, outermost first
    Permuted(Vec<usize>),
}

impl Default for Layout {
    fn default() -> Self {
        Layout::FirstMajor
    }
}

impl Layout {
    /// Dimension order for a buffer of rank `rank`.
    pub fn dimension_order(&self, rank: usize) -> Vec<usize> {
        match self {
            Layout::FirstMajor => (0..rank).collect(),
            Layout::LastMajor => (0..rank).rev().collect(),
            Layout::Permuted(order) => order.clone(),
        }
    }
}

/// A buffer handle. Cloning keeps the identity.
#[derive(Debug, Clone)]
pub struct Array {
    id: ArrayId,
    name: Symbol,
    role: Role,
    shape: Vec<usize>,
    layout: Layout,
}

impl Array {
    pub fn new(name: &str, role: Role, shape: Vec<usize>) -> Self {
        Self {
            id: ArrayId(NEXT_ARRAY_ID.fetch_add(1, Ordering::Relaxed)),
            name: intern(name),
            role,
            shape,
            layout: Layout::default(),
        }
    }

    /// Set the requested layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn id(&self) -> ArrayId { self.id }
    pub fn name(&self) -> Symbol { self.name }
    pub fn role(&self) -> Role { self.role }
    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn layout(&self) -> &Layout { &self.layout }
    pub fn rank(&self) -> usize { self.shape.len() }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Array {}

impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_identity() {
        let a = Array::new("A", Role::Input, vec![16, 16]);
        let b = Array::new("A", Role::Input, vec![16, 16]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_multicache_roles() {
        assert!(Role::Const.allows_multicache());
        assert!(Role::Input.allows_multicache());
        assert!(!Role::InputOutput.allows_multicache());
        assert!(!Role::Temp.allows_multicache());
    }

    #[test]
    fn test_layout_order() {
        assert_eq!(Layout::LastMajor.dimension_order(3), vec![2, 1, 0]);
        assert_eq!(Layout::default().dimension_order(2), vec![0, 1]);
    }
}
