//! JSON plan scripts.
//!
//! A script describes an iteration space, its schedule, the buffers the nest
//! touches, and a list of plan steps. Any step argument written as `"$name"`
//! becomes a deferred parameter whose value is taken from `parameters` only
//! after every step has been described, so scripts exercise the same late
//! binding path as library callers.
//!
//! ```json
//! {
//!   "dims": [{ "name": "i", "extent": 64 }, { "name": "j", "extent": 64 }],
//!   "splits": [{ "index": "i", "factor": 16 }],
//!   "arrays": [{ "name": "A", "role": "input", "shape": [64, 64] }],
//!   "parameters": { "L": 2 },
//!   "steps": [
//!     { "op": "cache", "source": "A", "level": "$L" },
//!     { "op": "unroll", "index": "j" }
//!   ]
//! }
//! ```

use crate::native::{
    CacheIndexing, GpuLaunchConfig, GpuProcessor, MemorySpace, NativeOp, ParallelPolicy, TraceEngine,
};
use crate::nest::{Array, IterationSpace, Layout, Role, Schedule, SymbolicIndex};
use crate::plan::{Arg, CacheHandle, CacheOptions, CacheSource, Deferred, Plan};
use crate::target::{LibraryDependency, Target};
use crate::utils::errors::{NestPlanError, NestPlanResult};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// One iteration-space dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimSpec {
    pub name: String,
    pub extent: usize,
}

/// A schedule split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSpec {
    pub index: String,
    pub factor: usize,
    /// Name of the new inner index, `<index>_in` by default
    #[serde(default)]
    pub inner: Option<String>,
}

/// A buffer declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArraySpec {
    pub name: String,
    pub role: Role,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub layout: Layout,
}

/// Named target presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPreset {
    Host,
    Gpu,
    Scalar,
}

/// Either a preset name or a full target description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetSpec {
    Preset(TargetPreset),
    Custom(Target),
}

impl Default for TargetSpec {
    fn default() -> Self {
        TargetSpec::Preset(TargetPreset::Host)
    }
}

impl TargetSpec {
    pub fn to_target(&self) -> Target {
        match self {
            TargetSpec::Preset(TargetPreset::Host) => Target::host(),
            TargetSpec::Preset(TargetPreset::Gpu) => Target::gpu(),
            TargetSpec::Preset(TargetPreset::Scalar) => Target::scalar_cpu(1),
            TargetSpec::Custom(target) => target.clone(),
        }
    }
}

/// An index list, or a single name (which may be a `$parameter`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    One(String),
    Many(Vec<String>),
}

/// A number, or a `$parameter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Value(usize),
    Param(String),
}

/// A list of numbers, or a `$parameter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarList {
    Values(Vec<usize>),
    Param(String),
}

/// One plan operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Unroll {
        index: String,
    },
    Vectorize {
        index: String,
    },
    Parallelize {
        indices: NameList,
        #[serde(default)]
        pin: Option<ScalarList>,
        #[serde(default)]
        policy: Option<String>,
    },
    Cache {
        /// Array name, or the `name` of an earlier cache step
        source: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        trigger_index: Option<String>,
        #[serde(default)]
        level: Option<Scalar>,
        #[serde(default)]
        trigger_level: Option<Scalar>,
        #[serde(default)]
        max_elements: Option<usize>,
        #[serde(default)]
        layout: Option<Layout>,
        #[serde(default)]
        thrifty: bool,
        #[serde(default)]
        location: MemorySpace,
        #[serde(default)]
        indexing: CacheIndexing,
    },
    Bind {
        indices: Vec<String>,
        grid: Vec<GpuProcessor>,
    },
    Kernelize {
        unroll: NameList,
        #[serde(default)]
        vectorize: Option<NameList>,
    },
    PackAndEmbedBuffer {
        array: String,
        wrapper_fn_name: String,
        #[serde(default)]
        packed_buffer_name: Option<String>,
        #[serde(default)]
        indexing: CacheIndexing,
    },
    EmitRuntimeInitPack {
        array: String,
        packing_fn_name: String,
        packed_buf_size_fn_name: String,
        #[serde(default)]
        indexing: CacheIndexing,
    },
}

/// A complete plan script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanScript {
    pub dims: Vec<DimSpec>,
    #[serde(default)]
    pub splits: Vec<SplitSpec>,
    /// Final dimension order, after splits
    #[serde(default)]
    pub order: Option<Vec<String>>,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub arrays: Vec<ArraySpec>,
    /// Values for `$parameters`, bound after all steps are described
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl PlanScript {
    pub fn from_json(text: &str) -> NestPlanResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> NestPlanResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// What running a script produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutput {
    pub function_name: String,
    /// Annotated loop listing after delayed calls were replayed
    pub listing: String,
    /// Engine calls in order
    pub ops: Vec<NativeOp>,
    pub launch: Option<GpuLaunchConfig>,
    pub dependencies: Vec<LibraryDependency>,
}

fn invalid(message: impl Into<String>) -> NestPlanError {
    NestPlanError::InvalidScript(message.into())
}

fn param_name(text: &str) -> Option<&str> {
    text.strip_prefix('$')
}

fn lookup_index(schedule: &Schedule, name: &str) -> NestPlanResult<SymbolicIndex> {
    schedule
        .index_by_name(name)
        .ok_or_else(|| invalid(format!("unknown index '{}'", name)))
}

/// Deferred parameters created while describing steps, one slot per name and type.
#[derive(Default)]
struct Params {
    indices: HashMap<String, Deferred<SymbolicIndex>>,
    index_lists: HashMap<String, Deferred<Vec<SymbolicIndex>>>,
    sizes: HashMap<String, Deferred<usize>>,
    size_lists: HashMap<String, Deferred<Vec<usize>>>,
    policies: HashMap<String, Deferred<ParallelPolicy>>,
}

fn slot<T>(map: &mut HashMap<String, Deferred<T>>, name: &str) -> Deferred<T> {
    map.entry(name.to_string())
        .or_insert_with(|| Deferred::new(name))
        .clone()
}

fn as_index_names(name: &str, value: &Value) -> NestPlanResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("parameter '{}' must list index names", name)))
            })
            .collect(),
        _ => Err(invalid(format!("parameter '{}' must name an index", name))),
    }
}

fn as_size(name: &str, value: &Value) -> NestPlanResult<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("parameter '{}' must be a non-negative integer", name)))
}

impl Params {
    /// Bind every parameter that has a value. Parameters without one stay
    /// unresolved and fail the build.
    fn bind(&self, values: &BTreeMap<String, Value>, schedule: &Schedule) -> NestPlanResult<()> {
        for (name, deferred) in &self.indices {
            if let Some(value) = values.get(name) {
                let index = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("parameter '{}' must name an index", name)))?;
                let _ = deferred.resolve(lookup_index(schedule, index)?);
            }
        }
        for (name, deferred) in &self.index_lists {
            if let Some(value) = values.get(name) {
                let indices = as_index_names(name, value)?
                    .iter()
                    .map(|n| lookup_index(schedule, n))
                    .collect::<NestPlanResult<Vec<_>>>()?;
                let _ = deferred.resolve(indices);
            }
        }
        for (name, deferred) in &self.sizes {
            if let Some(value) = values.get(name) {
                let _ = deferred.resolve(as_size(name, value)?);
            }
        }
        for (name, deferred) in &self.size_lists {
            if let Some(Value::Array(items)) = values.get(name) {
                let sizes = items
                    .iter()
                    .map(|v| as_size(name, v))
                    .collect::<NestPlanResult<Vec<_>>>()?;
                let _ = deferred.resolve(sizes);
            }
        }
        for (name, deferred) in &self.policies {
            if let Some(value) = values.get(name) {
                let policy = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("parameter '{}' must be a policy name", name)))?
                    .parse::<ParallelPolicy>()
                    .map_err(invalid)?;
                let _ = deferred.resolve(policy);
            }
        }
        Ok(())
    }
}

/// Turns script steps into plan calls.
struct Describer<'a> {
    schedule: &'a Schedule,
    arrays: &'a HashMap<String, Array>,
    caches: HashMap<String, CacheHandle>,
    params: Params,
}

impl<'a> Describer<'a> {
    fn index(&mut self, text: &str) -> NestPlanResult<Arg<SymbolicIndex>> {
        match param_name(text) {
            Some(name) => Ok(slot(&mut self.params.indices, name).into()),
            None => Ok(lookup_index(self.schedule, text)?.into()),
        }
    }

    fn index_list(&mut self, list: &NameList) -> NestPlanResult<Arg<Vec<SymbolicIndex>>> {
        match list {
            NameList::One(text) => match param_name(text) {
                Some(name) => Ok(slot(&mut self.params.index_lists, name).into()),
                None => Ok(lookup_index(self.schedule, text)?.into()),
            },
            NameList::Many(names) => {
                let indices = names
                    .iter()
                    .map(|n| lookup_index(self.schedule, n))
                    .collect::<NestPlanResult<Vec<_>>>()?;
                Ok(indices.into())
            }
        }
    }

    fn size(&mut self, scalar: &Scalar) -> NestPlanResult<Arg<usize>> {
        match scalar {
            Scalar::Value(n) => Ok((*n).into()),
            Scalar::Param(text) => {
                let name = param_name(text).ok_or_else(|| invalid(format!("'{}' is not a number", text)))?;
                Ok(slot(&mut self.params.sizes, name).into())
            }
        }
    }

    fn size_list(&mut self, list: &ScalarList) -> NestPlanResult<Arg<Vec<usize>>> {
        match list {
            ScalarList::Values(values) => Ok(values.clone().into()),
            ScalarList::Param(text) => {
                let name = param_name(text).ok_or_else(|| invalid(format!("'{}' is not a list", text)))?;
                Ok(slot(&mut self.params.size_lists, name).into())
            }
        }
    }

    fn policy(&mut self, policy: Option<&str>) -> NestPlanResult<Arg<ParallelPolicy>> {
        match policy {
            None => Ok(ParallelPolicy::Static.into()),
            Some(text) => match param_name(text) {
                Some(name) => Ok(slot(&mut self.params.policies, name).into()),
                None => Ok(text.parse::<ParallelPolicy>().map_err(invalid)?.into()),
            },
        }
    }

    fn array(&self, name: &str) -> NestPlanResult<&'a Array> {
        self.arrays
            .get(name)
            .ok_or_else(|| invalid(format!("unknown array '{}'", name)))
    }

    fn source(&self, name: &str) -> NestPlanResult<CacheSource> {
        if let Some(cache) = self.caches.get(name) {
            return Ok(cache.into());
        }
        Ok(self.array(name)?.into())
    }

    fn describe(&mut self, plan: &mut Plan<'_>, step: &Step) -> NestPlanResult<()> {
        match step {
            Step::Unroll { index } => {
                let index = self.index(index)?;
                plan.unroll(index)?;
            }
            Step::Vectorize { index } => {
                let index = self.index(index)?;
                plan.vectorize(index)?;
            }
            Step::Parallelize { indices, pin, policy } => {
                let indices = self.index_list(indices)?;
                let pin = pin.as_ref().map(|p| self.size_list(p)).transpose()?;
                let policy = self.policy(policy.as_deref())?;
                plan.parallelize(indices, pin, policy)?;
            }
            Step::Cache {
                source,
                name,
                index,
                trigger_index,
                level,
                trigger_level,
                max_elements,
                layout,
                thrifty,
                location,
                indexing,
            } => {
                let source = self.source(source)?;
                let mut options = CacheOptions::new()
                    .thrifty(*thrifty)
                    .location(*location)
                    .indexing(*indexing);
                if let Some(index) = index {
                    options = options.index(self.index(index)?);
                }
                if let Some(index) = trigger_index {
                    options = options.trigger_index(self.index(index)?);
                }
                if let Some(level) = level {
                    options = options.level(self.size(level)?);
                }
                if let Some(level) = trigger_level {
                    options = options.trigger_level(self.size(level)?);
                }
                if let Some(max) = max_elements {
                    options = options.max_elements(*max);
                }
                if let Some(layout) = layout {
                    options = options.layout(layout.clone());
                }
                let handle = plan.cache(source, options)?;
                if let Some(name) = name {
                    self.caches.insert(name.clone(), handle);
                }
            }
            Step::Bind { indices, grid } => {
                let indices = indices
                    .iter()
                    .map(|n| lookup_index(self.schedule, n))
                    .collect::<NestPlanResult<Vec<_>>>()?;
                plan.bind(&indices, grid)?;
            }
            Step::Kernelize { unroll, vectorize } => {
                let unroll = self.index_list(unroll)?;
                let vectorize = vectorize.as_ref().map(|v| self.index_list(v)).transpose()?;
                plan.kernelize(unroll, vectorize)?;
            }
            Step::PackAndEmbedBuffer { array, wrapper_fn_name, packed_buffer_name, indexing } => {
                let array = self.array(array)?;
                plan.pack_and_embed_buffer(array, wrapper_fn_name, packed_buffer_name.as_deref(), *indexing)?;
            }
            Step::EmitRuntimeInitPack { array, packing_fn_name, packed_buf_size_fn_name, indexing } => {
                let array = self.array(array)?;
                plan.emit_runtime_init_pack(array, packing_fn_name, packed_buf_size_fn_name, *indexing)?;
            }
        }
        Ok(())
    }
}

/// Build the schedule a script describes.
pub fn build_schedule(script: &PlanScript) -> NestPlanResult<Schedule> {
    let dims: Vec<(&str, usize)> = script.dims.iter().map(|d| (d.name.as_str(), d.extent)).collect();
    let space = IterationSpace::new(&dims);
    let mut schedule = Schedule::new(&space);

    for split in &script.splits {
        let index = lookup_index(&schedule, &split.index)?;
        let inner = split
            .inner
            .clone()
            .unwrap_or_else(|| format!("{}_in", split.index));
        schedule.split_named(index, split.factor, &inner)?;
    }
    if let Some(order) = &script.order {
        let order = order
            .iter()
            .map(|n| lookup_index(&schedule, n))
            .collect::<NestPlanResult<Vec<_>>>()?;
        schedule.reorder(&order)?;
    }
    Ok(schedule)
}

/// Describe, bind and build a script against the recording engine.
pub fn run_script(script: &PlanScript) -> NestPlanResult<ScriptOutput> {
    let schedule = build_schedule(script)?;
    let target = script.target.to_target();
    debug!("Script schedule: {} indices, target {:?}", schedule.len(), target.category);

    let arg_list: Vec<Array> = script
        .arrays
        .iter()
        .map(|a| Array::new(&a.name, a.role, a.shape.clone()).with_layout(a.layout.clone()))
        .collect();
    let arrays: HashMap<String, Array> = script
        .arrays
        .iter()
        .zip(&arg_list)
        .map(|(spec, array)| (spec.name.clone(), array.clone()))
        .collect();

    let mut plan = Plan::new(&schedule, target);
    let mut describer = Describer {
        schedule: &schedule,
        arrays: &arrays,
        caches: HashMap::new(),
        params: Params::default(),
    };
    for step in &script.steps {
        describer.describe(&mut plan, step)?;
    }
    info!(
        "Described {} step(s): {} queued, {} deferred",
        script.steps.len(),
        plan.commands().len(),
        plan.pending_calls().len()
    );

    describer.params.bind(&script.parameters, &schedule)?;
    plan.replay_delayed_calls()?;
    let listing = plan.render();

    let function = plan.into_function(arg_list.clone(), true, false);
    let function_name = function.name().to_string();
    let mut engine = TraceEngine::new();
    let mapping = engine.map_nest(&schedule, &arg_list);
    let built = function.emit(&mut engine, &mapping)?;

    Ok(ScriptOutput {
        function_name,
        listing,
        ops: built.native.into_ops(),
        launch: built.launch,
        dependencies: built.dependencies.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::PlanErrorKind;

    const MATMUL: &str = r#"{
        "dims": [
            { "name": "i", "extent": 64 },
            { "name": "j", "extent": 64 },
            { "name": "k", "extent": 64 }
        ],
        "splits": [{ "index": "i", "factor": 16 }],
        "target": { "category": "cpu", "vectorization_info": { "vector_bytes": 32, "vector_units": 16 }, "num_threads": 8 },
        "arrays": [
            { "name": "A", "role": "input", "shape": [64, 64] },
            { "name": "B", "role": "const", "shape": [64, 64], "layout": "last_major" },
            { "name": "C", "role": "input_output", "shape": [64, 64] }
        ],
        "parameters": { "L": 2, "V": "k" },
        "steps": [
            { "op": "parallelize", "indices": ["i"], "policy": "dynamic" },
            { "op": "cache", "source": "B", "name": "outer", "level": "$L" },
            { "op": "cache", "source": "outer", "level": 1 },
            { "op": "vectorize", "index": "$V" },
            { "op": "pack_and_embed_buffer", "array": "B", "wrapper_fn_name": "pack_b" }
        ]
    }"#;

    #[test]
    fn test_run_matmul() {
        let script = PlanScript::from_json(MATMUL).unwrap();
        let out = run_script(&script).unwrap();

        let names: Vec<_> = out.ops.iter().map(NativeOp::name).collect();
        assert_eq!(
            names,
            vec!["create_plan", "parallelize", "pack_and_embed_buffer", "add_cache", "add_cache", "vectorize"]
        );
        assert_eq!(out.dependencies, vec![LibraryDependency::OpenMp]);
        assert!(out.function_name.starts_with("nest_impl_"));
        assert!(out.listing.contains("for k in 0..64 { // vectorized"));

        match &out.ops[1] {
            NativeOp::Parallelize { num_threads, policy, .. } => {
                assert_eq!(*num_threads, 4);
                assert_eq!(*policy, ParallelPolicy::Dynamic);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_missing_parameter() {
        let mut script = PlanScript::from_json(MATMUL).unwrap();
        script.parameters.remove("L");
        let err = run_script(&script).unwrap_err();
        assert_eq!(err.kind(), Some(PlanErrorKind::UnresolvedParameter));
    }

    #[test]
    fn test_unknown_names() {
        let script = PlanScript::from_json(r#"{ "dims": [{ "name": "i", "extent": 4 }], "steps": [{ "op": "unroll", "index": "q" }] }"#)
            .unwrap();
        assert!(matches!(run_script(&script), Err(NestPlanError::InvalidScript(_))));
    }

    #[test]
    fn test_gpu_preset() {
        let script = PlanScript::from_json(
            r#"{
                "dims": [{ "name": "i", "extent": 32 }, { "name": "j", "extent": 32 }],
                "target": "gpu",
                "steps": [{ "op": "bind", "indices": ["i", "j"], "grid": ["block_x", "thread_x"] }]
            }"#,
        )
        .unwrap();
        let out = run_script(&script).unwrap();
        let launch = out.launch.unwrap();
        assert_eq!((launch.grid.x, launch.grid.y), (2, 2));
        assert_eq!(out.dependencies, vec![LibraryDependency::Vulkan]);
    }
}
