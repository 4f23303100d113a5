//! The plan builder.
//!
//! A [`Plan`] is described first and built once. Every operation either
//! validates its arguments and queues a [`Command`], or, when an argument is
//! an unresolved [`Deferred`](crate::plan::Deferred) value, parks the call
//! until [`Plan::build`] replays it.
//!
//! ```text
//! describe:  unroll / vectorize / parallelize / cache / bind / kernelize / pack
//!                 |                         |
//!            CommandQueue            DelayedCallRegistry
//!                 |                         |
//! build:          +<------- replay ---------+
//!                 |
//!       infer GPU launch -> create native plan -> apply commands in order
//! ```

use crate::native::{
    CacheIndexing, GpuLaunchConfig, GpuProcessor, NativeContext, NativeEngine, NativeMapping, ParallelPolicy,
};
use crate::nest::{Array, Role, Schedule, SymbolicIndex};
use crate::plan::attributes::{IndexAttr, IndexAttributeTracker};
use crate::plan::cache::{CacheHandle, CacheSource};
use crate::plan::command::{Command, CommandQueue};
use crate::plan::deferred::{resolve_opt, Arg, CacheOptions, DelayedCallRegistry, PendingCall};
use crate::plan::gpu::infer_launch_config;
use crate::plan::hierarchy::{CacheArgs, CacheHierarchyPlanner};
use crate::target::{LibraryDependency, Target};
use crate::utils::errors::{NestPlanError, NestPlanResult, PlanError, PlanErrorKind, PlanResult};
use log::{debug, info, trace, warn};
use std::collections::{BTreeSet, HashSet};

/// Transformations to apply to one scheduled loop nest.
#[derive(Debug)]
pub struct Plan<'s> {
    schedule: &'s Schedule,
    target: Target,
    attrs: IndexAttributeTracker,
    commands: CommandQueue,
    delayed: DelayedCallRegistry,
    dependencies: BTreeSet<LibraryDependency>,
}

/// Output of [`Plan::build`].
#[derive(Debug)]
pub struct BuiltPlan<P> {
    /// The native plan after every command ran
    pub native: P,
    /// Launch shape, for GPU targets
    pub launch: Option<GpuLaunchConfig>,
    /// Runtime libraries the lowered nest needs
    pub dependencies: BTreeSet<LibraryDependency>,
}

impl<'s> Plan<'s> {
    /// Start an empty plan for `schedule` on `target`.
    pub fn new(schedule: &'s Schedule, target: Target) -> Self {
        let mut dependencies = BTreeSet::new();
        if target.is_gpu() {
            dependencies.insert(LibraryDependency::Vulkan);
        }
        Self {
            schedule,
            target,
            attrs: IndexAttributeTracker::new(),
            commands: CommandQueue::new(),
            delayed: DelayedCallRegistry::new(),
            dependencies,
        }
    }

    pub fn schedule(&self) -> &'s Schedule {
        self.schedule
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Commands validated so far, in application order.
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    pub fn attributes(&self) -> &IndexAttributeTracker {
        &self.attrs
    }

    /// Runtime libraries required by the transformations described so far.
    pub fn dynamic_dependencies(&self) -> &BTreeSet<LibraryDependency> {
        &self.dependencies
    }

    /// Calls still waiting on deferred parameters.
    pub fn pending_calls(&self) -> &DelayedCallRegistry {
        &self.delayed
    }

    fn defer(&mut self, call: PendingCall) {
        debug!("Deferring {} until its parameters are resolved", call.name());
        self.delayed.register(call);
    }

    fn require_index(&self, index: &SymbolicIndex, operation: &str) -> PlanResult<()> {
        if self.schedule.contains(index) {
            Ok(())
        } else {
            Err(PlanError::new(
                PlanErrorKind::UnknownIndex,
                operation,
                format!("index {} is not in the schedule", index),
            ))
        }
    }

    fn require_vectorization(&self, operation: &str) -> PlanResult<()> {
        if self.target.vectorization_info.is_none() {
            return Err(PlanError::new(
                PlanErrorKind::UnsupportedTarget,
                operation,
                "the target does not support vectorization",
            ));
        }
        Ok(())
    }

    // ---- Unroll / vectorize ----

    /// Fully unroll the loop of `index`.
    pub fn unroll(&mut self, index: impl Into<Arg<SymbolicIndex>>) -> PlanResult<()> {
        let index = index.into();
        if index.is_pending() {
            self.defer(PendingCall::Unroll { index });
            return Ok(());
        }
        self.unroll_now(index.resolve()?)
    }

    fn unroll_now(&mut self, index: SymbolicIndex) -> PlanResult<()> {
        self.require_index(&index, "unroll")?;
        self.attrs.add(index, IndexAttr::Unrolled);
        self.commands.push(Command::Unroll { index });
        Ok(())
    }

    /// Vectorize the loop of `index`. The target must have vector registers.
    pub fn vectorize(&mut self, index: impl Into<Arg<SymbolicIndex>>) -> PlanResult<()> {
        let index = index.into();
        if index.is_pending() {
            self.defer(PendingCall::Vectorize { index });
            return Ok(());
        }
        self.vectorize_now(index.resolve()?)
    }

    fn vectorize_now(&mut self, index: SymbolicIndex) -> PlanResult<()> {
        let info = match &self.target.vectorization_info {
            Some(info) => info.clone(),
            None => {
                return Err(PlanError::new(
                    PlanErrorKind::UnsupportedTarget,
                    "vectorize",
                    "the target does not support vectorization",
                ))
            }
        };
        self.require_index(&index, "vectorize")?;
        self.attrs.add(index, IndexAttr::Vectorized);
        self.commands.push(Command::Vectorize { index, info });
        Ok(())
    }

    // ---- Parallelize ----

    /// Run a contiguous band of loops in parallel.
    ///
    /// Unsplit indices get one thread each; a split index gets one thread per
    /// split block. The total is capped by the target's thread count when the
    /// plan is built.
    pub fn parallelize(
        &mut self,
        indices: impl Into<Arg<Vec<SymbolicIndex>>>,
        pin: Option<Arg<Vec<usize>>>,
        policy: impl Into<Arg<ParallelPolicy>>,
    ) -> PlanResult<()> {
        if self.target.is_cpu() {
            self.dependencies.insert(LibraryDependency::OpenMp);
        }

        let indices = indices.into();
        let policy = policy.into();
        if indices.is_pending() || policy.is_pending() || pin.as_ref().is_some_and(Arg::is_pending) {
            self.defer(PendingCall::Parallelize { indices, pin, policy });
            return Ok(());
        }
        self.parallelize_now(indices.resolve()?, resolve_opt(&pin)?, policy.resolve()?)
    }

    fn parallelize_now(
        &mut self,
        indices: Vec<SymbolicIndex>,
        pin: Option<Vec<usize>>,
        policy: ParallelPolicy,
    ) -> PlanResult<()> {
        let first = indices.first().ok_or_else(|| {
            PlanError::new(PlanErrorKind::NonContiguousIndices, "parallelize", "no indices given")
        })?;
        let start = self.schedule.position(first).ok_or_else(|| {
            PlanError::new(
                PlanErrorKind::UnknownIndex,
                "parallelize",
                format!("index {} is not in the schedule", first),
            )
        })?;

        let order = self.schedule.indices();
        let end = start + indices.len();
        if end > order.len() || order[start..end] != indices[..] {
            return Err(PlanError::new(
                PlanErrorKind::NonContiguousIndices,
                "parallelize",
                "indices must be contiguous in the schedule dimension order",
            ));
        }

        for index in &indices {
            self.attrs.add(*index, IndexAttr::Parallelized);
        }
        self.commands.push(Command::Parallelize { indices, pin, policy });
        Ok(())
    }

    // ---- Caching ----

    /// Cache `source` according to `options`.
    ///
    /// If any of the level-governing options is deferred, or `source` is a
    /// cache that is itself still waiting, the returned handle is incomplete
    /// and is filled in when the plan is built.
    pub fn cache(&mut self, source: impl Into<CacheSource>, options: CacheOptions) -> PlanResult<CacheHandle> {
        let source = source.into();
        if options.has_pending() || !source.is_complete() {
            let placeholder = CacheHandle::placeholder();
            self.defer(PendingCall::Cache {
                source,
                options,
                placeholder: placeholder.clone(),
            });
            return Ok(placeholder);
        }
        self.cache_with(source, &options, None)
    }

    fn cache_with(
        &mut self,
        source: CacheSource,
        options: &CacheOptions,
        placeholder: Option<CacheHandle>,
    ) -> PlanResult<CacheHandle> {
        let args = CacheArgs::from_options(options)?;
        let placement = CacheHierarchyPlanner::new(self.schedule).plan(&source, &args)?;

        for (index, attr) in placement.tags {
            self.attrs.add(index, attr);
        }
        let handle = match placeholder {
            Some(handle) => {
                handle.complete(placement.spec);
                handle
            }
            None => CacheHandle::complete_new(placement.spec),
        };
        self.commands.push(Command::AddCache { cache: handle.clone() });
        Ok(handle)
    }

    // ---- GPU ----

    /// Bind each index to the GPU execution unit at the same position in `grid`.
    pub fn bind(&mut self, indices: &[SymbolicIndex], grid: &[GpuProcessor]) -> PlanResult<()> {
        if !self.target.is_gpu() {
            return Err(PlanError::new(
                PlanErrorKind::UnsupportedTarget,
                "bind",
                "only supported on plans with GPU targets",
            ));
        }
        if indices.len() != grid.len() {
            return Err(PlanError::new(
                PlanErrorKind::LengthMismatch,
                "bind",
                format!("{} indices but {} processors", indices.len(), grid.len()),
            ));
        }
        for index in indices {
            self.require_index(index, "bind")?;
        }
        for (&index, &processor) in indices.iter().zip(grid) {
            self.commands.push(Command::Bind { index, processor });
        }
        Ok(())
    }

    // ---- Kernelize ----

    /// Unroll every index of `unroll_indices`, then vectorize every index of
    /// `vectorize_indices`.
    pub fn kernelize(
        &mut self,
        unroll_indices: impl Into<Arg<Vec<SymbolicIndex>>>,
        vectorize_indices: Option<Arg<Vec<SymbolicIndex>>>,
    ) -> PlanResult<()> {
        let unroll_indices = unroll_indices.into();
        if unroll_indices.is_pending() || vectorize_indices.as_ref().is_some_and(Arg::is_pending) {
            self.defer(PendingCall::Kernelize { unroll_indices, vectorize_indices });
            return Ok(());
        }
        self.kernelize_now(
            unroll_indices.resolve()?,
            resolve_opt(&vectorize_indices)?.unwrap_or_default(),
        )
    }

    fn kernelize_now(&mut self, unroll: Vec<SymbolicIndex>, vectorize: Vec<SymbolicIndex>) -> PlanResult<()> {
        let unrolled: HashSet<_> = unroll.iter().collect();
        if let Some(index) = vectorize.iter().find(|i| unrolled.contains(i)) {
            return Err(PlanError::new(
                PlanErrorKind::ConflictingIndices,
                "kernelize",
                format!("vectorize index {} is also an unroll index", index),
            ));
        }
        self.require_vectorization("kernelize")?;
        for index in unroll.iter().chain(&vectorize) {
            self.require_index(index, "kernelize")?;
        }

        for index in unroll {
            self.unroll_now(index)?;
        }
        for index in vectorize {
            self.vectorize_now(index)?;
        }
        Ok(())
    }

    // ---- Packing ----

    fn require_const(array: &Array, operation: &str) -> PlanResult<()> {
        if array.role() != Role::Const {
            return Err(PlanError::new(
                PlanErrorKind::InvalidRole,
                operation,
                format!("can only pack constant data buffers, {} is {:?}", array.name(), array.role()),
            ));
        }
        Ok(())
    }

    /// Emit a packing routine for constant `array` and rewrite the nest to
    /// read the packed copy.
    pub fn pack_and_embed_buffer(
        &mut self,
        array: &Array,
        wrapper_fn_name: &str,
        packed_buffer_name: Option<&str>,
        indexing: CacheIndexing,
    ) -> PlanResult<()> {
        Self::require_const(array, "pack_and_embed_buffer")?;
        self.commands.push(Command::PackAndEmbedBuffer {
            array: array.clone(),
            wrapper_fn_name: wrapper_fn_name.to_string(),
            packed_buffer_name: packed_buffer_name.unwrap_or_default().to_string(),
            indexing,
        });
        Ok(())
    }

    /// Emit runtime packing entry points for constant `array`.
    pub fn emit_runtime_init_pack(
        &mut self,
        array: &Array,
        packing_fn_name: &str,
        packed_buf_size_fn_name: &str,
        indexing: CacheIndexing,
    ) -> PlanResult<()> {
        Self::require_const(array, "emit_runtime_init_pack")?;
        self.commands.push(Command::EmitRuntimeInitPack {
            array: array.clone(),
            packing_fn_name: packing_fn_name.to_string(),
            packed_buf_size_fn_name: packed_buf_size_fn_name.to_string(),
            indexing,
        });
        Ok(())
    }

    // ---- Build ----

    /// Run every parked call with its now-resolved arguments, in the order
    /// they were made. Their commands are queued after every command that was
    /// validated directly.
    ///
    /// Either every call succeeds or the plan is left as it was before the
    /// pass: commands, tags and dependencies are rolled back, placeholders go
    /// back to incomplete and the calls stay registered.
    pub fn replay_delayed_calls(&mut self) -> PlanResult<()> {
        if self.delayed.is_empty() {
            return Ok(());
        }

        let calls = self.delayed.take();
        let queued = self.commands.len();
        let attrs = self.attrs.clone();
        let dependencies = self.dependencies.clone();
        debug!("Replaying {} delayed call(s)", calls.len());

        let mut failure = None;
        for call in &calls {
            if let Err(e) = self.replay_call(call) {
                failure = Some(e);
                break;
            }
        }

        if let Some(e) = failure {
            warn!("Delayed call replay failed, rolling back: {}", e);
            self.commands.truncate(queued);
            self.attrs = attrs;
            self.dependencies = dependencies;
            for call in &calls {
                if let PendingCall::Cache { placeholder, .. } = call {
                    placeholder.reset();
                }
            }
            self.delayed.restore(calls);
            return Err(e);
        }
        Ok(())
    }

    fn replay_call(&mut self, call: &PendingCall) -> PlanResult<()> {
        trace!("replaying {}", call.name());
        match call {
            PendingCall::Unroll { index } => self.unroll_now(index.resolve()?),
            PendingCall::Vectorize { index } => self.vectorize_now(index.resolve()?),
            PendingCall::Parallelize { indices, pin, policy } => {
                if self.target.is_cpu() {
                    self.dependencies.insert(LibraryDependency::OpenMp);
                }
                self.parallelize_now(indices.resolve()?, resolve_opt(pin)?, policy.resolve()?)
            }
            PendingCall::Cache { source, options, placeholder } => self
                .cache_with(source.clone(), options, Some(placeholder.clone()))
                .map(|_| ()),
            PendingCall::Kernelize { unroll_indices, vectorize_indices } => self.kernelize_now(
                unroll_indices.resolve()?,
                resolve_opt(vectorize_indices)?.unwrap_or_default(),
            ),
        }
    }

    /// Replay delayed calls, create the native plan and apply every command
    /// to it in order.
    pub fn build<E: NativeEngine>(
        mut self,
        engine: &mut E,
        mapping: &NativeMapping,
    ) -> NestPlanResult<BuiltPlan<E::Plan>> {
        self.replay_delayed_calls()?;

        let launch = if self.target.is_gpu() {
            Some(infer_launch_config(self.schedule)?)
        } else {
            None
        };
        let native = match launch {
            Some(config) => engine.create_gpu_plan(config),
            None => engine.create_plan(),
        }
        .map_err(NestPlanError::Native)?;

        let mut ctx = NativeContext { mapping, plan: native };
        for command in &self.commands {
            trace!("applying {}", command);
            command.apply(self.schedule, &self.target, &mut ctx)?;
        }

        info!(
            "Built plan with {} command(s) for {:?} target",
            self.commands.len(),
            self.target.category
        );
        Ok(BuiltPlan {
            native: ctx.plan,
            launch,
            dependencies: self.dependencies,
        })
    }
}
