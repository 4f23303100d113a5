//! Validated transformation commands and the queue that holds them.
//!
//! Commands are plain values: a kind plus the concrete arguments captured at
//! validation time. They run in insertion order against one native context,
//! which is why caches are created outer-first and every index is looked up
//! through the mapping only when the command runs.

use crate::native::{
    CacheIndexing, GpuProcessor, MemorySpace, NativeCacheRequest, NativeCacheTarget, NativeContext, NativePlan,
    ParallelPolicy,
};
use crate::nest::{Array, Schedule, SymbolicIndex};
use crate::plan::cache::{CacheHandle, CacheSource};
use crate::target::{Target, VectorizationInfo};
use crate::utils::errors::{NestPlanError, NestPlanResult, PlanError, PlanErrorKind};
use crate::utils::pretty::format_list;
use log::debug;
use serde::Serialize;
use std::fmt;

/// Discriminant of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Unroll,
    Vectorize,
    Parallelize,
    AddCache,
    Bind,
    PackAndEmbedBuffer,
    EmitRuntimeInitPack,
}

/// One validated transformation.
#[derive(Debug, Clone)]
pub enum Command {
    Unroll {
        index: SymbolicIndex,
    },
    Vectorize {
        index: SymbolicIndex,
        info: VectorizationInfo,
    },
    Parallelize {
        indices: Vec<SymbolicIndex>,
        pin: Option<Vec<usize>>,
        policy: ParallelPolicy,
    },
    AddCache {
        cache: CacheHandle,
    },
    Bind {
        index: SymbolicIndex,
        processor: GpuProcessor,
    },
    PackAndEmbedBuffer {
        array: Array,
        wrapper_fn_name: String,
        packed_buffer_name: String,
        indexing: CacheIndexing,
    },
    EmitRuntimeInitPack {
        array: Array,
        packing_fn_name: String,
        packed_buf_size_fn_name: String,
        indexing: CacheIndexing,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Unroll { .. } => CommandKind::Unroll,
            Command::Vectorize { .. } => CommandKind::Vectorize,
            Command::Parallelize { .. } => CommandKind::Parallelize,
            Command::AddCache { .. } => CommandKind::AddCache,
            Command::Bind { .. } => CommandKind::Bind,
            Command::PackAndEmbedBuffer { .. } => CommandKind::PackAndEmbedBuffer,
            Command::EmitRuntimeInitPack { .. } => CommandKind::EmitRuntimeInitPack,
        }
    }

    /// Run this command against the native context.
    pub(crate) fn apply<P: NativePlan>(
        &self,
        schedule: &Schedule,
        target: &Target,
        ctx: &mut NativeContext<'_, P>,
    ) -> NestPlanResult<()> {
        match self {
            Command::Unroll { index } => {
                let native = ctx.mapping.index(index)?;
                ctx.plan.unroll(native).map_err(NestPlanError::Native)
            }
            Command::Vectorize { index, info } => {
                let native = ctx.mapping.index(index)?;
                ctx.plan.vectorize(native, info).map_err(NestPlanError::Native)
            }
            Command::Parallelize { indices, pin, policy } => {
                // Split blocks, clamped by what the target can run.
                let num_threads = target.num_threads.min(schedule.num_split_blocks(indices)).max(1);
                debug!("Parallelizing with {} thread(s), pin={:?}", num_threads, pin);
                let natives = indices
                    .iter()
                    .map(|i| ctx.mapping.index(i))
                    .collect::<Result<Vec<_>, _>>()?;
                ctx.plan
                    .parallelize(&natives, num_threads, *policy)
                    .map_err(NestPlanError::Native)
            }
            Command::AddCache { cache } => apply_cache(cache, schedule, target, ctx),
            Command::Bind { index, processor } => {
                let native = ctx.mapping.index(index)?;
                ctx.plan
                    .map_index_to_processor(native, *processor)
                    .map_err(NestPlanError::Native)
            }
            Command::PackAndEmbedBuffer { array, wrapper_fn_name, packed_buffer_name, indexing } => {
                let native = ctx.mapping.buffer(array)?;
                ctx.plan
                    .pack_and_embed_buffer(native, array, wrapper_fn_name, packed_buffer_name, *indexing)
                    .map_err(NestPlanError::Native)
            }
            Command::EmitRuntimeInitPack { array, packing_fn_name, packed_buf_size_fn_name, indexing } => {
                let native = ctx.mapping.buffer(array)?;
                ctx.plan
                    .emit_runtime_init_packing(native, packing_fn_name, packed_buf_size_fn_name, *indexing)
                    .map_err(NestPlanError::Native)
            }
        }
    }
}

fn apply_cache<P: NativePlan>(
    cache: &CacheHandle,
    schedule: &Schedule,
    target: &Target,
    ctx: &mut NativeContext<'_, P>,
) -> NestPlanResult<()> {
    let spec = cache.spec().ok_or_else(|| {
        PlanError::new(PlanErrorKind::UnresolvedParameter, "add cache", "cache was never completed")
    })?;

    let native_target = match &spec.source {
        CacheSource::Array(array) => NativeCacheTarget::Buffer(ctx.mapping.buffer(array)?),
        CacheSource::Cache(outer) => {
            let handle = outer.native_handle().ok_or_else(|| {
                PlanError::new(
                    PlanErrorKind::UnmappedHandle,
                    "add cache",
                    format!("outer cache #{} has not been created yet", outer.id()),
                )
            })?;
            NativeCacheTarget::Cache(handle)
        }
    };

    // Budget caches have no index of their own and sit at the innermost loop.
    let index = match spec.index.or_else(|| schedule.last_index()) {
        Some(i) => Some(ctx.mapping.index(&i)?),
        None => None,
    };
    let trigger_index = match spec.trigger_index {
        Some(i) => Some(ctx.mapping.index(&i)?),
        None => index,
    };

    let request = if target.is_gpu() {
        if spec.location != MemorySpace::None {
            debug!("GPU cache ignores requested memory space {:?}", spec.location);
        }
        NativeCacheRequest {
            target: native_target,
            index,
            trigger_index,
            max_elements: spec.max_elements,
            memory_space: MemorySpace::None,
            layout: None,
            indexing: None,
            dimension_order: None,
        }
    } else {
        let rank = spec.source.root_array().map(|a| a.rank()).unwrap_or(0);
        NativeCacheRequest {
            target: native_target,
            index,
            trigger_index,
            max_elements: spec.max_elements,
            memory_space: spec.location,
            dimension_order: Some(spec.layout.dimension_order(rank)),
            layout: Some(spec.layout.clone()),
            indexing: Some(spec.indexing),
        }
    };

    let native = ctx.plan.add_cache(request).map_err(NestPlanError::Native)?;
    cache.set_native_handle(native);
    Ok(())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unroll { index } => write!(f, "unroll({})", index),
            Command::Vectorize { index, .. } => write!(f, "vectorize({})", index),
            Command::Parallelize { indices, policy, .. } => {
                write!(f, "parallelize([{}], {})", format_list(indices, ", "), policy)
            }
            Command::AddCache { cache } => write!(f, "cache({:?})", cache),
            Command::Bind { index, processor } => write!(f, "bind({} -> {:?})", index, processor),
            Command::PackAndEmbedBuffer { array, wrapper_fn_name, .. } => {
                write!(f, "pack_and_embed_buffer({}, {})", array.name(), wrapper_fn_name)
            }
            Command::EmitRuntimeInitPack { array, packing_fn_name, .. } => {
                write!(f, "emit_runtime_init_pack({}, {})", array.name(), packing_fn_name)
            }
        }
    }
}

/// Commands in the order they were validated.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.commands.iter().map(Command::kind).collect()
    }

    /// Drop commands queued after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.commands.truncate(len);
    }
}

impl<'a> IntoIterator for &'a CommandQueue {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeEngine, NativeMapping, NativeOp, TraceEngine};
    use crate::nest::IterationSpace;

    #[test]
    fn test_queue_order() {
        let i = SymbolicIndex::new("i");
        let j = SymbolicIndex::new("j");
        let mut queue = CommandQueue::new();
        queue.push(Command::Unroll { index: j });
        queue.push(Command::Parallelize { indices: vec![i], pin: None, policy: ParallelPolicy::Static });
        queue.push(Command::Unroll { index: i });

        assert_eq!(queue.kinds(), vec![CommandKind::Unroll, CommandKind::Parallelize, CommandKind::Unroll]);
        queue.truncate(1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().map(|c| c.to_string()), Some("unroll(j)".to_string()));
    }

    #[test]
    fn test_apply_unmapped_index() {
        let space = IterationSpace::new(&[("i", 8)]);
        let sched = Schedule::new(&space);
        let mapping = NativeMapping::new();
        let mut engine = TraceEngine::new();
        let mut ctx = NativeContext { mapping: &mapping, plan: engine.create_plan().unwrap() };

        let cmd = Command::Unroll { index: space.index(0).unwrap() };
        let err = cmd.apply(&sched, &Target::host(), &mut ctx).unwrap_err();
        assert_eq!(err.kind(), Some(PlanErrorKind::UnmappedHandle));
    }

    #[test]
    fn test_parallelize_thread_clamp() {
        let space = IterationSpace::new(&[("i", 256)]);
        let mut sched = Schedule::new(&space);
        let i = space.index(0).unwrap();
        sched.split(i, 8).unwrap();

        let mut engine = TraceEngine::new();
        let mapping = engine.map_nest(&sched, &[]);
        let mut ctx = NativeContext { mapping: &mapping, plan: engine.create_plan().unwrap() };
        let cmd = Command::Parallelize { indices: vec![i], pin: None, policy: ParallelPolicy::Dynamic };

        cmd.apply(&sched, &Target::scalar_cpu(8), &mut ctx).unwrap();
        cmd.apply(&sched, &Target::scalar_cpu(64), &mut ctx).unwrap();

        let threads: Vec<_> = ctx
            .plan
            .ops()
            .iter()
            .filter_map(|op| match op {
                NativeOp::Parallelize { num_threads, .. } => Some(*num_threads),
                _ => None,
            })
            .collect();
        assert_eq!(threads, vec![8, 32]);
    }

    #[test]
    fn test_parallelize_zero_thread_target() {
        let space = IterationSpace::new(&[("i", 64)]);
        let mut sched = Schedule::new(&space);
        let i = space.index(0).unwrap();
        sched.split(i, 8).unwrap();

        let mut engine = TraceEngine::new();
        let mapping = engine.map_nest(&sched, &[]);
        let mut ctx = NativeContext { mapping: &mapping, plan: engine.create_plan().unwrap() };
        let cmd = Command::Parallelize { indices: vec![i], pin: None, policy: ParallelPolicy::Static };
        cmd.apply(&sched, &Target::scalar_cpu(0), &mut ctx).unwrap();

        match ctx.plan.ops().last() {
            Some(NativeOp::Parallelize { num_threads, .. }) => assert_eq!(*num_threads, 1),
            other => panic!("expected a parallelize op, got {:?}", other),
        }
    }
}
