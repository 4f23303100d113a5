//! Deferred parameters and the delayed-call registry.
//!
//! A [`Deferred`] value is a named slot that is resolved exactly once, after
//! the plan has been described. Any transformation receiving an unresolved
//! deferred argument is parked in the [`DelayedCallRegistry`] instead of being
//! validated, and replayed with concrete arguments at build time.

use crate::native::{CacheIndexing, MemorySpace, ParallelPolicy};
use crate::nest::{Layout, SymbolicIndex};
use crate::plan::cache::{CacheHandle, CacheSource};
use crate::utils::errors::{PlanError, PlanErrorKind, PlanResult};
use once_cell::unsync::OnceCell;
use std::fmt;
use std::rc::Rc;

struct Slot<T> {
    name: String,
    value: OnceCell<T>,
}

/// A parameter whose value is supplied after the plan is described.
///
/// Clones share the same slot.
pub struct Deferred<T> {
    slot: Rc<Slot<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self { slot: Rc::clone(&self.slot) }
    }
}

impl<T> Deferred<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            slot: Rc::new(Slot {
                name: name.into(),
                value: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Give the parameter its value. A second call hands the value back.
    pub fn resolve(&self, value: T) -> Result<(), T> {
        self.slot.value.set(value)
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.value.get().is_some()
    }
}

impl<T: Clone> Deferred<T> {
    /// The resolved value. Asking before resolution is a caller error.
    pub fn get_value(&self) -> PlanResult<T> {
        self.slot.value.get().cloned().ok_or_else(|| {
            PlanError::new(
                PlanErrorKind::UnresolvedParameter,
                "replay",
                format!("parameter '{}' has no value", self.slot.name),
            )
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.value.get() {
            Some(v) => write!(f, "Deferred({} = {:?})", self.slot.name, v),
            None => write!(f, "Deferred({})", self.slot.name),
        }
    }
}

/// A transformation argument: either concrete or deferred.
#[derive(Debug, Clone)]
pub enum Arg<T> {
    Value(T),
    Deferred(Deferred<T>),
}

impl<T: Clone> Arg<T> {
    /// True if the argument is deferred and not yet resolved.
    pub fn is_pending(&self) -> bool {
        match self {
            Arg::Value(_) => false,
            Arg::Deferred(d) => !d.is_resolved(),
        }
    }

    pub fn resolve(&self) -> PlanResult<T> {
        match self {
            Arg::Value(v) => Ok(v.clone()),
            Arg::Deferred(d) => d.get_value(),
        }
    }
}

impl<T> From<Deferred<T>> for Arg<T> {
    fn from(d: Deferred<T>) -> Self {
        Arg::Deferred(d)
    }
}

impl<T> From<&Deferred<T>> for Arg<T> {
    fn from(d: &Deferred<T>) -> Self {
        Arg::Deferred(d.clone())
    }
}

impl From<SymbolicIndex> for Arg<SymbolicIndex> {
    fn from(v: SymbolicIndex) -> Self {
        Arg::Value(v)
    }
}

impl From<usize> for Arg<usize> {
    fn from(v: usize) -> Self {
        Arg::Value(v)
    }
}

impl From<ParallelPolicy> for Arg<ParallelPolicy> {
    fn from(v: ParallelPolicy) -> Self {
        Arg::Value(v)
    }
}

impl From<Vec<usize>> for Arg<Vec<usize>> {
    fn from(v: Vec<usize>) -> Self {
        Arg::Value(v)
    }
}

impl From<SymbolicIndex> for Arg<Vec<SymbolicIndex>> {
    fn from(v: SymbolicIndex) -> Self {
        Arg::Value(vec![v])
    }
}

impl From<Vec<SymbolicIndex>> for Arg<Vec<SymbolicIndex>> {
    fn from(v: Vec<SymbolicIndex>) -> Self {
        Arg::Value(v)
    }
}

impl From<&[SymbolicIndex]> for Arg<Vec<SymbolicIndex>> {
    fn from(v: &[SymbolicIndex]) -> Self {
        Arg::Value(v.to_vec())
    }
}

impl<const N: usize> From<[SymbolicIndex; N]> for Arg<Vec<SymbolicIndex>> {
    fn from(v: [SymbolicIndex; N]) -> Self {
        Arg::Value(v.to_vec())
    }
}

fn any_pending<T: Clone>(arg: &Option<Arg<T>>) -> bool {
    arg.as_ref().is_some_and(Arg::is_pending)
}

pub(crate) fn resolve_opt<T: Clone>(arg: &Option<Arg<T>>) -> PlanResult<Option<T>> {
    arg.as_ref().map(Arg::resolve).transpose()
}

/// Arguments of a cache request.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub index: Option<Arg<SymbolicIndex>>,
    pub trigger_index: Option<Arg<SymbolicIndex>>,
    pub level: Option<Arg<usize>>,
    pub trigger_level: Option<Arg<usize>>,
    pub max_elements: Option<usize>,
    pub layout: Option<Layout>,
    pub thrifty: bool,
    pub location: MemorySpace,
    pub indexing: CacheIndexing,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache at the level of `index`.
    pub fn index(mut self, index: impl Into<Arg<SymbolicIndex>>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Fill the cache at the level of `index`.
    pub fn trigger_index(mut self, index: impl Into<Arg<SymbolicIndex>>) -> Self {
        self.trigger_index = Some(index.into());
        self
    }

    /// Cache `level` wildcard dimensions (1 = innermost index).
    pub fn level(mut self, level: impl Into<Arg<usize>>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn trigger_level(mut self, level: impl Into<Arg<usize>>) -> Self {
        self.trigger_level = Some(level.into());
        self
    }

    /// Bound the cache by element count instead of level.
    pub fn max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = Some(max_elements);
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn thrifty(mut self, thrifty: bool) -> Self {
        self.thrifty = thrifty;
        self
    }

    pub fn location(mut self, location: MemorySpace) -> Self {
        self.location = location;
        self
    }

    pub fn indexing(mut self, indexing: CacheIndexing) -> Self {
        self.indexing = indexing;
        self
    }

    /// True if any level-governing argument is still unresolved.
    pub(crate) fn has_pending(&self) -> bool {
        any_pending(&self.index)
            || any_pending(&self.trigger_index)
            || any_pending(&self.level)
            || any_pending(&self.trigger_level)
    }
}

/// A transformation parked until its deferred arguments are resolved.
#[derive(Debug, Clone)]
pub enum PendingCall {
    Unroll {
        index: Arg<SymbolicIndex>,
    },
    Vectorize {
        index: Arg<SymbolicIndex>,
    },
    Parallelize {
        indices: Arg<Vec<SymbolicIndex>>,
        pin: Option<Arg<Vec<usize>>>,
        policy: Arg<ParallelPolicy>,
    },
    Cache {
        source: CacheSource,
        options: CacheOptions,
        placeholder: CacheHandle,
    },
    Kernelize {
        unroll_indices: Arg<Vec<SymbolicIndex>>,
        vectorize_indices: Option<Arg<Vec<SymbolicIndex>>>,
    },
}

impl PendingCall {
    pub fn name(&self) -> &'static str {
        match self {
            PendingCall::Unroll { .. } => "unroll",
            PendingCall::Vectorize { .. } => "vectorize",
            PendingCall::Parallelize { .. } => "parallelize",
            PendingCall::Cache { .. } => "cache",
            PendingCall::Kernelize { .. } => "kernelize",
        }
    }
}

/// Ordered list of pending calls.
#[derive(Debug, Clone, Default)]
pub struct DelayedCallRegistry {
    calls: Vec<PendingCall>,
}

impl DelayedCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, call: PendingCall) {
        self.calls.push(call);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingCall> {
        self.calls.iter()
    }

    /// Remove every call, in registration order.
    pub(crate) fn take(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.calls)
    }

    /// Put calls back after an aborted replay.
    pub(crate) fn restore(&mut self, calls: Vec<PendingCall>) {
        self.calls = calls;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_once() {
        let p: Deferred<usize> = Deferred::new("P");
        assert!(!p.is_resolved());
        assert_eq!(p.get_value().unwrap_err().kind, PlanErrorKind::UnresolvedParameter);

        assert!(p.resolve(2).is_ok());
        assert_eq!(p.resolve(3), Err(3));
        assert_eq!(p.get_value().unwrap(), 2);
    }

    #[test]
    fn test_clones_share_slot() {
        let p: Deferred<usize> = Deferred::new("P");
        let arg: Arg<usize> = (&p).into();
        assert!(arg.is_pending());
        p.resolve(5).unwrap();
        assert!(!arg.is_pending());
        assert_eq!(arg.resolve().unwrap(), 5);
    }

    #[test]
    fn test_cache_options_resolution() {
        let level: Deferred<usize> = Deferred::new("L");
        let opts = CacheOptions::new().level(&level).max_elements(16);
        assert!(opts.has_pending());
        assert!(resolve_opt(&opts.level).is_err());

        level.resolve(2).unwrap();
        assert!(!opts.has_pending());
        assert_eq!(resolve_opt(&opts.level).unwrap(), Some(2));
        assert_eq!(opts.max_elements, Some(16));
    }

    #[test]
    fn test_registry_order() {
        let mut reg = DelayedCallRegistry::new();
        let i = SymbolicIndex::new("i");
        reg.register(PendingCall::Vectorize { index: i.into() });
        reg.register(PendingCall::Unroll { index: i.into() });
        let names: Vec<_> = reg.iter().map(PendingCall::name).collect();
        assert_eq!(names, vec!["vectorize", "unroll"]);

        let taken = reg.take();
        assert!(reg.is_empty());
        reg.restore(taken);
        assert_eq!(reg.len(), 2);
    }
}
