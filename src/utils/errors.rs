//! Error types for the plan builder.
//!
//! Validation failures carry a [`PlanErrorKind`] so callers can match on the
//! exact rule that was violated. Native engine failures are carried through
//! untouched.

use std::fmt;
use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Error, Debug)]
pub enum NestPlanError {
    /// A transformation was rejected during validation
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// The native loop-nest engine reported a failure
    #[error("Native engine error: {0}")]
    Native(#[source] anyhow::Error),

    /// A plan script could not be decoded
    #[error("Script error: {0}")]
    Script(#[from] serde_json::Error),

    /// A plan script decoded but refers to things that do not exist
    #[error("Invalid script: {0}")]
    InvalidScript(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NestPlanError {
    /// The validation kind, if this is a validation failure.
    pub fn kind(&self) -> Option<PlanErrorKind> {
        match self {
            NestPlanError::Plan(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Error raised while validating or applying a transformation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    /// The error message
    pub message: String,
    /// The kind of plan error
    pub kind: PlanErrorKind,
    /// The operation that failed
    pub operation: String,
}

impl PlanError {
    /// Create a new plan error.
    pub fn new(kind: PlanErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            operation: operation.into(),
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.message, self.operation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanErrorKind {
    /// Not exactly one of index, level, max_elements was given
    AmbiguousCacheSize,
    /// Level-style and index-style keys were mixed for the same slot
    ConflictingCacheKeys,
    /// A cache or trigger level is outside `1..=order.len()`
    InvalidCacheLevel,
    /// The trigger level is smaller than the cache level
    TriggerBeforeLevel,
    /// A max element budget of zero
    InvalidCacheBudget,
    /// An outer budget cache is not larger than its inner cache
    InvalidHierarchyBudget,
    /// An outer level cache does not enclose its inner cache
    InvalidHierarchyLevel,
    /// Outer and inner caches use different sizing modes
    HierarchyModeMismatch,
    /// Multi-level fill requested on a buffer that is not CONST or INPUT
    InvalidMulticacheSource,
    /// Parallelized indices are not a contiguous run of the schedule
    NonContiguousIndices,
    /// The target lacks the required capability
    UnsupportedTarget,
    /// An index is both unrolled and vectorized
    ConflictingIndices,
    /// Packing requested on a non-constant buffer
    InvalidRole,
    /// Feature reserved for later
    NotImplemented,
    /// Iteration extent is not a multiple of the block size
    IndivisibleShape,
    /// Index is not part of the schedule
    UnknownIndex,
    /// A split factor of zero
    InvalidSplitFactor,
    /// Paired sequences differ in length
    LengthMismatch,
    /// A deferred parameter had no value at replay
    UnresolvedParameter,
    /// The native mapping has no handle for an index, buffer or cache
    UnmappedHandle,
}

impl PlanErrorKind {
    /// Short stable name, used in diagnostics and script output.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanErrorKind::AmbiguousCacheSize => "ambiguous_cache_size",
            PlanErrorKind::ConflictingCacheKeys => "conflicting_cache_keys",
            PlanErrorKind::InvalidCacheLevel => "invalid_cache_level",
            PlanErrorKind::TriggerBeforeLevel => "trigger_before_level",
            PlanErrorKind::InvalidCacheBudget => "invalid_cache_budget",
            PlanErrorKind::InvalidHierarchyBudget => "invalid_hierarchy_budget",
            PlanErrorKind::InvalidHierarchyLevel => "invalid_hierarchy_level",
            PlanErrorKind::HierarchyModeMismatch => "hierarchy_mode_mismatch",
            PlanErrorKind::InvalidMulticacheSource => "invalid_multicache_source",
            PlanErrorKind::NonContiguousIndices => "non_contiguous_indices",
            PlanErrorKind::UnsupportedTarget => "unsupported_target",
            PlanErrorKind::ConflictingIndices => "conflicting_indices",
            PlanErrorKind::InvalidRole => "invalid_role",
            PlanErrorKind::NotImplemented => "not_implemented",
            PlanErrorKind::IndivisibleShape => "indivisible_shape",
            PlanErrorKind::UnknownIndex => "unknown_index",
            PlanErrorKind::InvalidSplitFactor => "invalid_split_factor",
            PlanErrorKind::LengthMismatch => "length_mismatch",
            PlanErrorKind::UnresolvedParameter => "unresolved_parameter",
            PlanErrorKind::UnmappedHandle => "unmapped_handle",
        }
    }
}

impl fmt::Display for PlanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type using PlanError.
pub type PlanResult<T> = Result<T, PlanError>;

/// Result type using NestPlanError.
pub type NestPlanResult<T> = Result<T, NestPlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::new(
            PlanErrorKind::NonContiguousIndices,
            "parallelize",
            "indices must be contiguous in the schedule order",
        );
        let s = format!("{}", err);
        assert!(s.contains("contiguous"));
        assert!(s.contains("parallelize"));
    }

    #[test]
    fn test_kind_passthrough() {
        let err: NestPlanError = PlanError::new(PlanErrorKind::InvalidRole, "pack", "not const").into();
        assert_eq!(err.kind(), Some(PlanErrorKind::InvalidRole));

        let native = NestPlanError::Native(anyhow::anyhow!("engine down"));
        assert_eq!(native.kind(), None);
        assert!(native.to_string().contains("engine down"));
    }
}
