//! A recording engine.
//!
//! `TraceEngine` implements the native interfaces by appending every call to
//! an op list. It backs the command line tool and the test suite, and can be
//! told to fail a given operation to exercise error propagation.

use super::{
    CacheIndexing, GpuLaunchConfig, GpuProcessor, NativeBuffer, NativeCache, NativeCacheRequest,
    NativeEngine, NativeIndex, NativeMapping, NativePlan, ParallelPolicy,
};
use crate::nest::{Array, Schedule};
use crate::target::VectorizationInfo;
use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NativeOp {
    CreatePlan,
    CreateGpuPlan { config: GpuLaunchConfig },
    Unroll { index: NativeIndex },
    Vectorize { index: NativeIndex, vector_bytes: usize },
    Parallelize { indices: Vec<NativeIndex>, num_threads: usize, policy: ParallelPolicy },
    AddCache { cache: NativeCache, request: NativeCacheRequest },
    MapIndexToProcessor { index: NativeIndex, processor: GpuProcessor },
    PackAndEmbedBuffer {
        target: NativeBuffer,
        wrapper_fn_name: String,
        packed_buffer_name: String,
        indexing: CacheIndexing,
    },
    EmitRuntimeInitPacking {
        target: NativeBuffer,
        packing_fn_name: String,
        packed_buf_size_fn_name: String,
        indexing: CacheIndexing,
    },
}

impl NativeOp {
    /// Operation name as used by [`TraceEngine::fail_on`].
    pub fn name(&self) -> &'static str {
        match self {
            NativeOp::CreatePlan => "create_plan",
            NativeOp::CreateGpuPlan { .. } => "create_gpu_plan",
            NativeOp::Unroll { .. } => "unroll",
            NativeOp::Vectorize { .. } => "vectorize",
            NativeOp::Parallelize { .. } => "parallelize",
            NativeOp::AddCache { .. } => "add_cache",
            NativeOp::MapIndexToProcessor { .. } => "map_index_to_processor",
            NativeOp::PackAndEmbedBuffer { .. } => "pack_and_embed_buffer",
            NativeOp::EmitRuntimeInitPacking { .. } => "emit_runtime_init_packing",
        }
    }
}

impl fmt::Display for NativeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeOp::CreatePlan => write!(f, "create_plan"),
            NativeOp::CreateGpuPlan { config } => {
                write!(f, "create_gpu_plan grid={} block={}", config.grid, config.block)
            }
            NativeOp::Unroll { index } => write!(f, "unroll %{}", index.0),
            NativeOp::Vectorize { index, vector_bytes } => {
                write!(f, "vectorize %{} bytes={}", index.0, vector_bytes)
            }
            NativeOp::Parallelize { indices, num_threads, policy } => {
                let ids: Vec<String> = indices.iter().map(|i| format!("%{}", i.0)).collect();
                write!(f, "parallelize [{}] threads={} policy={}", ids.join(", "), num_threads, policy)
            }
            NativeOp::AddCache { cache, request } => {
                write!(f, "add_cache #{} from {:?}", cache.0, request.target)?;
                if let Some(index) = request.index {
                    write!(f, " at %{}", index.0)?;
                }
                if let Some(trigger) = request.trigger_index {
                    write!(f, " trigger %{}", trigger.0)?;
                }
                if let Some(max) = request.max_elements {
                    write!(f, " max_elements={}", max)?;
                }
                Ok(())
            }
            NativeOp::MapIndexToProcessor { index, processor } => {
                write!(f, "map %{} -> {:?}", index.0, processor)
            }
            NativeOp::PackAndEmbedBuffer { target, wrapper_fn_name, .. } => {
                write!(f, "pack_and_embed_buffer buf{} via {}", target.0, wrapper_fn_name)
            }
            NativeOp::EmitRuntimeInitPacking { target, packing_fn_name, .. } => {
                write!(f, "emit_runtime_init_packing buf{} via {}", target.0, packing_fn_name)
            }
        }
    }
}

/// Engine that records calls instead of lowering anything.
#[derive(Debug, Default)]
pub struct TraceEngine {
    fail_on: Option<&'static str>,
}

impl TraceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail on every plan this engine creates.
    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    /// Assign handles to every index of `schedule` and to `arrays`, in order.
    pub fn map_nest(&self, schedule: &Schedule, arrays: &[Array]) -> NativeMapping {
        let mut mapping = NativeMapping::new();
        for (n, index) in schedule.indices().iter().enumerate() {
            mapping.insert_index(index, NativeIndex(n as u64));
        }
        for (n, array) in arrays.iter().enumerate() {
            mapping.insert_buffer(array, NativeBuffer(n as u64));
        }
        mapping
    }

    fn plan_with(&self, first: NativeOp) -> Result<TracePlan> {
        let mut plan = TracePlan {
            ops: Vec::new(),
            next_cache: 0,
            fail_on: self.fail_on,
        };
        plan.record(first)?;
        Ok(plan)
    }
}

impl NativeEngine for TraceEngine {
    type Plan = TracePlan;

    fn create_plan(&mut self) -> Result<TracePlan> {
        self.plan_with(NativeOp::CreatePlan)
    }

    fn create_gpu_plan(&mut self, config: GpuLaunchConfig) -> Result<TracePlan> {
        self.plan_with(NativeOp::CreateGpuPlan { config })
    }
}

/// Plan produced by [`TraceEngine`].
#[derive(Debug)]
pub struct TracePlan {
    ops: Vec<NativeOp>,
    next_cache: u64,
    fail_on: Option<&'static str>,
}

impl TracePlan {
    /// Recorded operations in call order.
    pub fn ops(&self) -> &[NativeOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<NativeOp> {
        self.ops
    }

    fn record(&mut self, op: NativeOp) -> Result<()> {
        if self.fail_on == Some(op.name()) {
            bail!("trace engine refused {}", op.name());
        }
        self.ops.push(op);
        Ok(())
    }
}

impl NativePlan for TracePlan {
    fn unroll(&mut self, index: NativeIndex) -> Result<()> {
        self.record(NativeOp::Unroll { index })
    }

    fn vectorize(&mut self, index: NativeIndex, info: &VectorizationInfo) -> Result<()> {
        self.record(NativeOp::Vectorize { index, vector_bytes: info.vector_bytes })
    }

    fn parallelize(&mut self, indices: &[NativeIndex], num_threads: usize, policy: ParallelPolicy) -> Result<()> {
        self.record(NativeOp::Parallelize {
            indices: indices.to_vec(),
            num_threads,
            policy,
        })
    }

    fn add_cache(&mut self, request: NativeCacheRequest) -> Result<NativeCache> {
        let cache = NativeCache(self.next_cache);
        self.record(NativeOp::AddCache { cache, request })?;
        self.next_cache += 1;
        Ok(cache)
    }

    fn map_index_to_processor(&mut self, index: NativeIndex, processor: GpuProcessor) -> Result<()> {
        self.record(NativeOp::MapIndexToProcessor { index, processor })
    }

    fn pack_and_embed_buffer(
        &mut self,
        target: NativeBuffer,
        _data: &Array,
        wrapper_fn_name: &str,
        packed_buffer_name: &str,
        indexing: CacheIndexing,
    ) -> Result<()> {
        self.record(NativeOp::PackAndEmbedBuffer {
            target,
            wrapper_fn_name: wrapper_fn_name.to_string(),
            packed_buffer_name: packed_buffer_name.to_string(),
            indexing,
        })
    }

    fn emit_runtime_init_packing(
        &mut self,
        target: NativeBuffer,
        packing_fn_name: &str,
        packed_buf_size_fn_name: &str,
        indexing: CacheIndexing,
    ) -> Result<()> {
        self.record(NativeOp::EmitRuntimeInitPacking {
            target,
            packing_fn_name: packing_fn_name.to_string(),
            packed_buf_size_fn_name: packed_buf_size_fn_name.to_string(),
            indexing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nest::IterationSpace;

    #[test]
    fn test_records_in_order() {
        let mut engine = TraceEngine::new();
        let mut plan = engine.create_plan().unwrap();
        plan.unroll(NativeIndex(1)).unwrap();
        plan.parallelize(&[NativeIndex(0)], 4, ParallelPolicy::Dynamic).unwrap();

        let names: Vec<_> = plan.ops().iter().map(|op| op.name()).collect();
        assert_eq!(names, vec!["create_plan", "unroll", "parallelize"]);
        assert_eq!(plan.ops()[2].to_string(), "parallelize [%0] threads=4 policy=dynamic");
    }

    #[test]
    fn test_fail_on() {
        let mut engine = TraceEngine::new().fail_on("unroll");
        let mut plan = engine.create_plan().unwrap();
        let err = plan.unroll(NativeIndex(0)).unwrap_err();
        assert!(err.to_string().contains("unroll"));
        assert_eq!(plan.ops().len(), 1);
    }

    #[test]
    fn test_map_nest() {
        let space = IterationSpace::new(&[("i", 4), ("j", 4)]);
        let sched = Schedule::new(&space);
        let mapping = TraceEngine::new().map_nest(&sched, &[]);
        assert_eq!(mapping.num_indices(), 2);
        assert_eq!(mapping.index(&sched.indices()[1]).unwrap(), NativeIndex(1));
    }
}
