//! Schedule order: the dimension order plans are written against.
//!
//! A schedule starts as the iteration space's natural order. Splitting an
//! index records `(Split, factor)` on the outer index and inserts a new inner
//! index right after it:
//!
//! ```text
//! [i, j]  --split(i, 16)-->  [i, i_in, j]     i: (Split, 16), extent ceil(N/16)
//! ```
//!
//! Levels count positions from the innermost end: level 1 is the last index.

use crate::nest::index::{IterationSpace, SymbolicIndex};
use crate::utils::errors::{PlanError, PlanErrorKind, PlanResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Kind of transform recorded on an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexTransform {
    /// The index was split by a factor
    Split,
}

/// Ordered schedule of a loop nest.
#[derive(Debug, Clone)]
pub struct Schedule {
    order: Vec<SymbolicIndex>,
    shape: Vec<(usize, SymbolicIndex)>,
    extents: HashMap<SymbolicIndex, usize>,
    transforms: HashMap<SymbolicIndex, (IndexTransform, usize)>,
}

impl Schedule {
    /// Create a schedule in the natural order of `space`.
    pub fn new(space: &IterationSpace) -> Self {
        let shape = space.shape().to_vec();
        let order = space.indices();
        let extents = shape.iter().map(|&(extent, idx)| (idx, extent)).collect();
        Self {
            order,
            shape,
            extents,
            transforms: HashMap::new(),
        }
    }

    /// Indices in dimension order, outermost first.
    pub fn indices(&self) -> &[SymbolicIndex] {
        &self.order
    }

    /// `(extent, index)` pairs of the underlying iteration space.
    pub fn shape(&self) -> &[(usize, SymbolicIndex)] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, index: &SymbolicIndex) -> Option<usize> {
        self.order.iter().position(|i| i == index)
    }

    pub fn contains(&self, index: &SymbolicIndex) -> bool {
        self.position(index).is_some()
    }

    /// Innermost index.
    pub fn last_index(&self) -> Option<SymbolicIndex> {
        self.order.last().copied()
    }

    /// The index sitting at `level` (level 1 = innermost).
    pub fn index_at_level(&self, level: usize) -> Option<SymbolicIndex> {
        if level == 0 || level > self.order.len() {
            return None;
        }
        Some(self.order[self.order.len() - level])
    }

    /// The level of `index` (innermost = 1).
    pub fn level_of(&self, index: &SymbolicIndex) -> Option<usize> {
        self.position(index).map(|pos| self.order.len() - pos)
    }

    /// Trip count of `index` after splits.
    pub fn extent(&self, index: &SymbolicIndex) -> Option<usize> {
        self.extents.get(index).copied()
    }

    pub fn transform(&self, index: &SymbolicIndex) -> Option<(IndexTransform, usize)> {
        self.transforms.get(index).copied()
    }

    /// Split factor recorded on `index`, if it was split.
    pub fn split_factor(&self, index: &SymbolicIndex) -> Option<usize> {
        match self.transform(index) {
            Some((IndexTransform::Split, factor)) => Some(factor),
            None => None,
        }
    }

    /// Find an index by display name. First match in dimension order wins.
    pub fn index_by_name(&self, name: &str) -> Option<SymbolicIndex> {
        self.order.iter().copied().find(|i| i.name().to_string() == name)
    }

    /// Split `index` by `factor`, returning the new inner index.
    pub fn split(&mut self, index: SymbolicIndex, factor: usize) -> PlanResult<SymbolicIndex> {
        let name = format!("{}_in", index.name());
        self.split_named(index, factor, &name)
    }

    /// Split `index` by `factor`, naming the new inner index `inner_name`.
    pub fn split_named(
        &mut self,
        index: SymbolicIndex,
        factor: usize,
        inner_name: &str,
    ) -> PlanResult<SymbolicIndex> {
        let pos = self.position(&index).ok_or_else(|| {
            PlanError::new(PlanErrorKind::UnknownIndex, "split", format!("index {} is not in the schedule", index))
        })?;
        if factor == 0 {
            return Err(PlanError::new(PlanErrorKind::InvalidSplitFactor, "split", "split factor must be positive"));
        }
        if self.transforms.contains_key(&index) {
            return Err(PlanError::new(
                PlanErrorKind::NotImplemented,
                "split",
                format!("index {} is already split; split its inner index instead", index),
            ));
        }

        let extent = self.extents.get(&index).copied().unwrap_or(factor);
        let inner = SymbolicIndex::new(inner_name);
        self.order.insert(pos + 1, inner);
        self.extents.insert(index, extent.div_ceil(factor));
        self.extents.insert(inner, factor.min(extent.max(1)));
        self.transforms.insert(index, (IndexTransform::Split, factor));
        Ok(inner)
    }

    /// Replace the dimension order with a permutation of the current one.
    pub fn reorder(&mut self, order: &[SymbolicIndex]) -> PlanResult<()> {
        if order.len() != self.order.len() {
            return Err(PlanError::new(
                PlanErrorKind::LengthMismatch,
                "reorder",
                format!("expected {} indices, got {}", self.order.len(), order.len()),
            ));
        }
        let current: HashSet<_> = self.order.iter().collect();
        let mut seen = HashSet::new();
        for index in order {
            if !current.contains(index) || !seen.insert(index) {
                return Err(PlanError::new(
                    PlanErrorKind::UnknownIndex,
                    "reorder",
                    format!("{} is not a permutation of the schedule", index),
                ));
            }
        }
        self.order = order.to_vec();
        Ok(())
    }

    /// Number of thread blocks implied by `indices`.
    ///
    /// An index that was split contributes its outer trip count; any other
    /// index contributes one.
    pub fn num_split_blocks(&self, indices: &[SymbolicIndex]) -> usize {
        indices
            .iter()
            .map(|idx| {
                if self.split_factor(idx).is_some() {
                    self.extent(idx).unwrap_or(1).max(1)
                } else {
                    1
                }
            })
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let space = IterationSpace::new(&[("i", 8), ("j", 8), ("k", 8)]);
        let sched = Schedule::new(&space);
        let [i, j, k] = [space.index(0).unwrap(), space.index(1).unwrap(), space.index(2).unwrap()];

        assert_eq!(sched.index_at_level(1), Some(k));
        assert_eq!(sched.index_at_level(3), Some(i));
        assert_eq!(sched.index_at_level(0), None);
        assert_eq!(sched.index_at_level(4), None);
        assert_eq!(sched.level_of(&j), Some(2));
    }

    #[test]
    fn test_split_inserts_inner() {
        let space = IterationSpace::new(&[("i", 64), ("j", 30)]);
        let mut sched = Schedule::new(&space);
        let i = space.index(0).unwrap();
        let ii = sched.split(i, 16).unwrap();

        assert_eq!(sched.len(), 3);
        assert_eq!(sched.position(&ii), Some(1));
        assert_eq!(sched.split_factor(&i), Some(16));
        assert_eq!(sched.split_factor(&ii), None);
        assert_eq!(sched.extent(&i), Some(4));
        assert_eq!(sched.extent(&ii), Some(16));
        assert_eq!(ii.to_string(), "i_in");
    }

    #[test]
    fn test_split_twice_rejected() {
        let space = IterationSpace::new(&[("i", 64)]);
        let mut sched = Schedule::new(&space);
        let i = space.index(0).unwrap();
        sched.split(i, 8).unwrap();
        let err = sched.split(i, 2).unwrap_err();
        assert_eq!(err.kind, PlanErrorKind::NotImplemented);
    }

    #[test]
    fn test_num_split_blocks() {
        let space = IterationSpace::new(&[("i", 100), ("j", 64)]);
        let mut sched = Schedule::new(&space);
        let i = space.index(0).unwrap();
        let j = space.index(1).unwrap();
        sched.split(i, 10).unwrap();
        sched.split(j, 16).unwrap();

        assert_eq!(sched.num_split_blocks(&[i]), 10);
        assert_eq!(sched.num_split_blocks(&[i, j]), 40);
        let ii = sched.indices()[1];
        assert_eq!(sched.num_split_blocks(&[ii]), 1);
    }

    #[test]
    fn test_reorder() {
        let space = IterationSpace::new(&[("i", 4), ("j", 4)]);
        let mut sched = Schedule::new(&space);
        let (i, j) = (space.index(0).unwrap(), space.index(1).unwrap());

        sched.reorder(&[j, i]).unwrap();
        assert_eq!(sched.indices(), &[j, i]);
        assert_eq!(sched.reorder(&[j, j]).unwrap_err().kind, PlanErrorKind::UnknownIndex);
        assert_eq!(sched.reorder(&[j]).unwrap_err().kind, PlanErrorKind::LengthMismatch);
    }
}
