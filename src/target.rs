//! Target descriptors.
//!
//! A target says what kind of device the nest is lowered for, whether it has
//! vector registers, and how many hardware threads may be used.

use serde::{Deserialize, Serialize};

/// Device category of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetCategory {
    /// General purpose processor
    Cpu,
    /// Graphics processor
    Gpu,
    /// Anything else (accelerators, simulators)
    Other,
}

/// Vector capability of a target, handed to the native engine when an index
/// is vectorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorizationInfo {
    /// Width of one vector register in bytes
    pub vector_bytes: usize,
    /// Number of vector registers
    pub vector_units: usize,
}

impl Default for VectorizationInfo {
    fn default() -> Self {
        Self {
            vector_bytes: 32,
            vector_units: 16,
        }
    }
}

/// Hardware description a plan is validated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Device category
    pub category: TargetCategory,
    /// Vector support, absent when the target has no vector registers
    #[serde(default)]
    pub vectorization_info: Option<VectorizationInfo>,
    /// Maximum number of threads
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

fn default_num_threads() -> usize {
    1
}

impl Default for Target {
    fn default() -> Self {
        Self::host()
    }
}

impl Target {
    /// The machine doing the build, with AVX2-class vector registers.
    pub fn host() -> Self {
        Self {
            category: TargetCategory::Cpu,
            vectorization_info: Some(VectorizationInfo::default()),
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// A CPU with `num_threads` threads and no vector registers.
    pub fn scalar_cpu(num_threads: usize) -> Self {
        Self {
            category: TargetCategory::Cpu,
            vectorization_info: None,
            num_threads,
        }
    }

    /// A generic GPU.
    pub fn gpu() -> Self {
        Self {
            category: TargetCategory::Gpu,
            vectorization_info: None,
            num_threads: 1024,
        }
    }

    /// Set the thread count.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn is_gpu(&self) -> bool {
        self.category == TargetCategory::Gpu
    }

    pub fn is_cpu(&self) -> bool {
        self.category == TargetCategory::Cpu
    }
}

/// Runtime libraries a lowered nest may need to link against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryDependency {
    /// OpenMP runtime for CPU parallel loops
    OpenMp,
    /// Vulkan runtime for GPU kernels
    Vulkan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(Target::host().vectorization_info.is_some());
        assert!(Target::host().num_threads >= 1);
        assert!(Target::gpu().is_gpu());
        assert!(Target::scalar_cpu(4).vectorization_info.is_none());
    }

    #[test]
    fn test_deserialize_defaults() {
        let target: Target = serde_json::from_str(r#"{"category": "cpu"}"#).unwrap();
        assert_eq!(target.num_threads, 1);
        assert!(target.vectorization_info.is_none());
    }
}
