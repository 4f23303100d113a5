//! Utility modules shared across the crate:
//! - Error types
//! - Name interning
//! - Pretty printing

pub mod errors;
pub mod intern;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use intern::{intern, resolve, Symbol};
pub use pretty::{format_list, PrettyPrint};
