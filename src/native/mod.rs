//! Interface to the native loop-nest engine.
//!
//! The engine owns the concrete loop nest. Plans only ever talk to it through
//! [`NativeEngine`] and [`NativePlan`], passing handles looked up in a
//! [`NativeMapping`]. Engine errors are `anyhow::Error` and are passed back to
//! the caller without interpretation.

pub mod trace;

pub use trace::{NativeOp, TraceEngine, TracePlan};

use crate::nest::{Array, ArrayId, IndexId, Layout, SymbolicIndex};
use crate::target::VectorizationInfo;
use crate::utils::errors::{PlanError, PlanErrorKind, PlanResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Engine handle of a materialized loop index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeIndex(pub u64);

/// Engine handle of a materialized buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeBuffer(pub u64);

/// Engine handle of a created cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeCache(pub u64);

/// What a native cache copies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeCacheTarget {
    Buffer(NativeBuffer),
    Cache(NativeCache),
}

/// Memory space a cache is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySpace {
    /// Let the engine decide
    #[default]
    None,
    Global,
    Shared,
    Private,
}

/// How cache coordinates relate to the cached buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheIndexing {
    /// Global coordinates map to the cache's physical layout
    #[default]
    GlobalToPhysical,
    /// Global coordinates map to the cache's logical shape
    GlobalToLogical,
}

/// Scheduling discipline for parallel loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPolicy {
    #[default]
    Static,
    Dynamic,
}

impl FromStr for ParallelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(ParallelPolicy::Static),
            "dynamic" => Ok(ParallelPolicy::Dynamic),
            other => Err(format!("unknown parallel policy '{}'", other)),
        }
    }
}

impl fmt::Display for ParallelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelPolicy::Static => f.write_str("static"),
            ParallelPolicy::Dynamic => f.write_str("dynamic"),
        }
    }
}

/// GPU execution unit an index can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuProcessor {
    BlockX,
    BlockY,
    BlockZ,
    ThreadX,
    ThreadY,
    ThreadZ,
}

/// A three-component launch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dim3 {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Grid and block shape of a GPU kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuLaunchConfig {
    pub grid: Dim3,
    pub block: Dim3,
}

/// Arguments of a native cache creation.
///
/// GPU plans only fill the target, indices, budget and memory space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCacheRequest {
    pub target: NativeCacheTarget,
    pub index: Option<NativeIndex>,
    pub trigger_index: Option<NativeIndex>,
    pub max_elements: Option<usize>,
    pub memory_space: MemorySpace,
    pub layout: Option<Layout>,
    pub indexing: Option<CacheIndexing>,
    pub dimension_order: Option<Vec<usize>>,
}

/// A concrete plan created by the engine. Every operation takes handles that
/// were previously materialized by the engine.
pub trait NativePlan {
    /// Fully unroll a loop.
    fn unroll(&mut self, index: NativeIndex) -> Result<()>;

    /// Vectorize a loop.
    fn vectorize(&mut self, index: NativeIndex, info: &VectorizationInfo) -> Result<()>;

    /// Run a contiguous band of loops on `num_threads` threads.
    fn parallelize(&mut self, indices: &[NativeIndex], num_threads: usize, policy: ParallelPolicy) -> Result<()>;

    /// Create a cache and return its handle.
    fn add_cache(&mut self, request: NativeCacheRequest) -> Result<NativeCache>;

    /// Map a loop onto a GPU execution unit.
    fn map_index_to_processor(&mut self, index: NativeIndex, processor: GpuProcessor) -> Result<()>;

    /// Emit a packing routine for constant data and assume packed input.
    fn pack_and_embed_buffer(
        &mut self,
        target: NativeBuffer,
        data: &Array,
        wrapper_fn_name: &str,
        packed_buffer_name: &str,
        indexing: CacheIndexing,
    ) -> Result<()>;

    /// Emit runtime packing entry points for a buffer.
    fn emit_runtime_init_packing(
        &mut self,
        target: NativeBuffer,
        packing_fn_name: &str,
        packed_buf_size_fn_name: &str,
        indexing: CacheIndexing,
    ) -> Result<()>;
}

/// Factory for concrete plans.
pub trait NativeEngine {
    type Plan: NativePlan;

    fn create_plan(&mut self) -> Result<Self::Plan>;

    fn create_gpu_plan(&mut self, config: GpuLaunchConfig) -> Result<Self::Plan>;
}

/// Lookup from symbolic identities to engine handles, built once per build.
#[derive(Debug, Clone, Default)]
pub struct NativeMapping {
    indices: HashMap<IndexId, NativeIndex>,
    buffers: HashMap<ArrayId, NativeBuffer>,
}

impl NativeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_index(&mut self, index: &SymbolicIndex, native: NativeIndex) {
        self.indices.insert(index.id(), native);
    }

    pub fn insert_buffer(&mut self, array: &Array, native: NativeBuffer) {
        self.buffers.insert(array.id(), native);
    }

    pub fn index(&self, index: &SymbolicIndex) -> PlanResult<NativeIndex> {
        self.indices.get(&index.id()).copied().ok_or_else(|| {
            PlanError::new(
                PlanErrorKind::UnmappedHandle,
                "native mapping",
                format!("index {:?} has no native counterpart", index),
            )
        })
    }

    pub fn buffer(&self, array: &Array) -> PlanResult<NativeBuffer> {
        self.buffers.get(&array.id()).copied().ok_or_else(|| {
            PlanError::new(
                PlanErrorKind::UnmappedHandle,
                "native mapping",
                format!("buffer {} has no native counterpart", array.name()),
            )
        })
    }

    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }
}

/// State shared by every command during one build.
pub struct NativeContext<'m, P> {
    pub mapping: &'m NativeMapping,
    pub plan: P,
}
