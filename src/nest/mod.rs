//! The loop nest being scheduled: symbolic indices, buffers and the
//! schedule order that plans are written against.

pub mod index;
pub mod array;
pub mod schedule;

pub use index::{IndexId, IterationSpace, SymbolicIndex};
pub use array::{Array, ArrayId, Layout, Role};
pub use schedule::{IndexTransform, Schedule};
