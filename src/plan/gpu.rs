//! GPU launch shape inference.
//!
//! The first two dimensions of the iteration space become the x and y axes of
//! the launch. Each axis takes its block size from the split factor recorded
//! on that dimension's index, or [`BASE_BLOCK_DIM`] when it was never split;
//! the grid covers the extent exactly:
//!
//! ```text
//! extent 32, split 16  ->  block 16, grid 2
//! extent 30, split 16  ->  error (30 % 16 != 0)
//! ```

use crate::native::{Dim3, GpuLaunchConfig};
use crate::nest::Schedule;
use crate::utils::errors::{PlanError, PlanErrorKind, PlanResult};
use log::debug;

/// Block size of an axis whose index was not split.
pub const BASE_BLOCK_DIM: usize = 16;

/// Number of iteration-space dimensions mapped onto launch axes.
const MAPPED_AXES: usize = 2;

/// Derive grid and block dimensions for `schedule`.
pub fn infer_launch_config(schedule: &Schedule) -> PlanResult<GpuLaunchConfig> {
    let mut block = [BASE_BLOCK_DIM; MAPPED_AXES];
    let mut grid = [1usize; MAPPED_AXES];

    for (axis, &(extent, index)) in schedule.shape().iter().take(MAPPED_AXES).enumerate() {
        if let Some(factor) = schedule.split_factor(&index) {
            block[axis] = factor;
        }
        if extent % block[axis] != 0 {
            return Err(PlanError::new(
                PlanErrorKind::IndivisibleShape,
                "gpu launch",
                format!("shape {} must be a multiple of split factor {}", extent, block[axis]),
            ));
        }
        grid[axis] = extent / block[axis];
    }

    let config = GpuLaunchConfig {
        grid: Dim3::new(grid[0], grid[1], 1),
        block: Dim3::new(block[0], block[1], 1),
    };
    debug!("GPU launch: grid={} block={}", config.grid, config.block);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nest::IterationSpace;

    #[test]
    fn test_split_factor_sets_block() {
        let space = IterationSpace::new(&[("i", 32)]);
        let mut sched = Schedule::new(&space);
        sched.split(space.index(0).unwrap(), 16).unwrap();

        let config = infer_launch_config(&sched).unwrap();
        assert_eq!(config.block.x, 16);
        assert_eq!(config.grid.x, 2);
        assert_eq!(config.grid.z, 1);
        assert_eq!(config.block.z, 1);
    }

    #[test]
    fn test_indivisible_shape() {
        let space = IterationSpace::new(&[("i", 30)]);
        let mut sched = Schedule::new(&space);
        sched.split(space.index(0).unwrap(), 16).unwrap();

        let err = infer_launch_config(&sched).unwrap_err();
        assert_eq!(err.kind, PlanErrorKind::IndivisibleShape);
    }

    #[test]
    fn test_default_block_dim() {
        let space = IterationSpace::new(&[("i", 64), ("j", 128), ("k", 7)]);
        let mut sched = Schedule::new(&space);
        sched.split(space.index(1).unwrap(), 32).unwrap();

        let config = infer_launch_config(&sched).unwrap();
        assert_eq!(config.block, Dim3::new(16, 32, 1));
        assert_eq!(config.grid, Dim3::new(4, 4, 1));
    }

    #[test]
    fn test_default_block_must_divide() {
        let space = IterationSpace::new(&[("i", 20)]);
        let sched = Schedule::new(&space);
        let err = infer_launch_config(&sched).unwrap_err();
        assert_eq!(err.kind, PlanErrorKind::IndivisibleShape);
    }
}
