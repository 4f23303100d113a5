//! # nestplan - Loop Nest Transformation Planning
//!
//! Describe hardware-mapping transformations against the symbolic indices of
//! a loop nest, then apply them to a native loop-nest engine in one build:
//! - Unrolling, vectorization and parallelization
//! - Multi-level caching with level / trigger-level derivation
//! - GPU binding with launch shape inference
//! - Constant buffer packing
//! - Deferred parameters, bound after the plan is described
//!
//! ## Architecture
//!
//! ```text
//! Schedule -> Plan (validate | defer) -> replay -> native plan -> commands in order
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use nestplan::prelude::*;
//!
//! let space = IterationSpace::new(&[("i", 64), ("j", 64)]);
//! let mut schedule = Schedule::new(&space);
//! let i = space.index(0).unwrap();
//! schedule.split(i, 16)?;
//!
//! let a = Array::new("A", Role::Input, vec![64, 64]);
//! let level: Deferred<usize> = Deferred::new("L");
//!
//! let mut plan = Plan::new(&schedule, Target::host());
//! plan.parallelize(i, None, ParallelPolicy::Static)?;
//! let cache = plan.cache(&a, CacheOptions::new().level(&level))?;
//! level.resolve(2).unwrap();
//!
//! let mut engine = TraceEngine::new();
//! let mapping = engine.map_nest(&schedule, &[a]);
//! let built = plan.build(&mut engine, &mapping)?;
//! ```

#![warn(clippy::all)]

pub mod native;
pub mod nest;
pub mod plan;
pub mod script;
pub mod target;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::native::{
        CacheIndexing, GpuLaunchConfig, GpuProcessor, MemorySpace, NativeEngine, NativeMapping, NativeOp,
        NativePlan, ParallelPolicy, TraceEngine,
    };
    pub use crate::nest::{Array, IterationSpace, Layout, Role, Schedule, SymbolicIndex};
    pub use crate::plan::{
        Arg, BuiltPlan, CacheHandle, CacheOptions, CacheSource, Deferred, Function, Plan,
    };
    pub use crate::target::{LibraryDependency, Target, TargetCategory, VectorizationInfo};
    pub use crate::utils::errors::*;
}

pub use plan::Plan;
pub use script::{run_script, PlanScript, ScriptOutput};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
