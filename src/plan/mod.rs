//! Transformation plans.
//!
//! A plan records hardware-mapping transformations against the symbolic
//! indices of a [`Schedule`](crate::nest::Schedule) and applies them to a
//! native loop nest when it is built.

pub mod attributes;
pub mod builder;
pub mod cache;
pub mod command;
pub mod deferred;
pub mod function;
pub mod gpu;
pub mod hierarchy;
pub mod print;

pub use attributes::{IndexAttr, IndexAttributeTracker};
pub use builder::{BuiltPlan, Plan};
pub use cache::{CacheHandle, CacheSource, CacheSpec};
pub use command::{Command, CommandKind, CommandQueue};
pub use deferred::{Arg, CacheOptions, Deferred, DelayedCallRegistry, PendingCall};
pub use function::Function;
pub use gpu::{infer_launch_config, BASE_BLOCK_DIM};
pub use hierarchy::{CacheArgs, CacheHierarchyPlanner, CachePlacement};
pub use print::PlanListing;
