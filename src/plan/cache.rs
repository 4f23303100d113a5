//! Cache directives.
//!
//! A cache copies a region of its source (a buffer, or an enclosing cache)
//! into faster storage. Callers hold a [`CacheHandle`]; the handle may start
//! out incomplete when its levels depend on deferred parameters and is filled
//! in place at replay time, so inner caches built on it never need rewiring.

use crate::native::{CacheIndexing, MemorySpace, NativeCache};
use crate::nest::{Array, Layout, SymbolicIndex};
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(0);

/// What a cache copies from.
#[derive(Debug, Clone)]
pub enum CacheSource {
    Array(Array),
    Cache(CacheHandle),
}

impl CacheSource {
    /// The buffer at the root of a cache hierarchy.
    pub fn root_array(&self) -> Option<Array> {
        match self {
            CacheSource::Array(array) => Some(array.clone()),
            CacheSource::Cache(handle) => handle.spec().and_then(|spec| spec.source.root_array()),
        }
    }

    /// Layout a new cache inherits when none is requested.
    pub fn layout(&self) -> Layout {
        match self {
            CacheSource::Array(array) => array.layout().clone(),
            CacheSource::Cache(handle) => handle.spec().map(|spec| spec.layout.clone()).unwrap_or_default(),
        }
    }

    /// False only for a cache source whose own parameters are unresolved.
    pub fn is_complete(&self) -> bool {
        match self {
            CacheSource::Array(_) => true,
            CacheSource::Cache(handle) => handle.is_complete(),
        }
    }
}

impl From<Array> for CacheSource {
    fn from(array: Array) -> Self {
        CacheSource::Array(array)
    }
}

impl From<&Array> for CacheSource {
    fn from(array: &Array) -> Self {
        CacheSource::Array(array.clone())
    }
}

impl From<CacheHandle> for CacheSource {
    fn from(handle: CacheHandle) -> Self {
        CacheSource::Cache(handle)
    }
}

impl From<&CacheHandle> for CacheSource {
    fn from(handle: &CacheHandle) -> Self {
        CacheSource::Cache(handle.clone())
    }
}

/// A fully validated cache directive.
///
/// Level-bounded caches carry all four of `index`, `trigger_index`, `level`
/// and `trigger_level`; budget-bounded caches carry only `max_elements`.
#[derive(Debug, Clone)]
pub struct CacheSpec {
    pub source: CacheSource,
    pub index: Option<SymbolicIndex>,
    pub trigger_index: Option<SymbolicIndex>,
    pub level: Option<usize>,
    pub trigger_level: Option<usize>,
    pub max_elements: Option<usize>,
    pub layout: Layout,
    pub location: MemorySpace,
    pub indexing: CacheIndexing,
    pub thrifty: bool,
}

impl CacheSpec {
    pub fn is_budget_bounded(&self) -> bool {
        self.max_elements.is_some()
    }
}

struct CacheCell {
    id: u64,
    spec: RefCell<Option<CacheSpec>>,
    native: RefCell<Option<NativeCache>>,
}

/// Shared handle to a cache. Clones refer to the same cache.
#[derive(Clone)]
pub struct CacheHandle {
    cell: Rc<CacheCell>,
}

impl CacheHandle {
    fn with_spec(spec: Option<CacheSpec>) -> Self {
        Self {
            cell: Rc::new(CacheCell {
                id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
                spec: RefCell::new(spec),
                native: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn complete_new(spec: CacheSpec) -> Self {
        Self::with_spec(Some(spec))
    }

    pub(crate) fn placeholder() -> Self {
        Self::with_spec(None)
    }

    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn is_complete(&self) -> bool {
        self.cell.spec.borrow().is_some()
    }

    /// A copy of the directive, or `None` while incomplete.
    pub fn spec(&self) -> Option<CacheSpec> {
        self.cell.spec.borrow().clone()
    }

    /// Borrow the directive without cloning it.
    pub fn borrow_spec(&self) -> Ref<'_, Option<CacheSpec>> {
        self.cell.spec.borrow()
    }

    pub fn level(&self) -> Option<usize> {
        self.borrow_spec().as_ref().and_then(|s| s.level)
    }

    pub fn trigger_level(&self) -> Option<usize> {
        self.borrow_spec().as_ref().and_then(|s| s.trigger_level)
    }

    pub fn max_elements(&self) -> Option<usize> {
        self.borrow_spec().as_ref().and_then(|s| s.max_elements)
    }

    /// Engine handle, set once the cache has been created natively.
    pub fn native_handle(&self) -> Option<NativeCache> {
        *self.cell.native.borrow()
    }

    /// Fill in a placeholder. Returns false if it was already complete.
    pub(crate) fn complete(&self, spec: CacheSpec) -> bool {
        let mut slot = self.cell.spec.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(spec);
        true
    }

    /// Undo a completion made by an aborted replay pass.
    pub(crate) fn reset(&self) {
        *self.cell.spec.borrow_mut() = None;
    }

    pub(crate) fn set_native_handle(&self, native: NativeCache) {
        *self.cell.native.borrow_mut() = Some(native);
    }
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.borrow_spec().as_ref() {
            Some(spec) => match spec.max_elements {
                Some(max) => write!(f, "Cache#{}(max_elements={})", self.id(), max),
                None => write!(
                    f,
                    "Cache#{}(level={:?}, trigger_level={:?})",
                    self.id(),
                    spec.level,
                    spec.trigger_level
                ),
            },
            None => write!(f, "Cache#{}(incomplete)", self.id()),
        }
    }
}
