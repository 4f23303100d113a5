//! Cache level derivation and hierarchy validation.
//!
//! A cache is sized in exactly one of three ways: by an index, by a level, or
//! by an element budget. Index and level are two views of one position in the
//! schedule order, counted from the innermost end:
//!
//! ```text
//! order:  [i, j, k, l]
//! level:   4  3  2  1      level(k) = 2, index_at_level(3) = j
//! ```
//!
//! The trigger (where the cache is filled) defaults to the cache position and
//! may only move outward, and only for read-only sources.

use crate::native::{CacheIndexing, MemorySpace};
use crate::nest::{Layout, Schedule, SymbolicIndex};
use crate::plan::attributes::IndexAttr;
use crate::plan::cache::{CacheSource, CacheSpec};
use crate::plan::deferred::{resolve_opt, CacheOptions};
use crate::utils::errors::{PlanError, PlanErrorKind, PlanResult};
use log::debug;

const OP: &str = "cache";

fn err(kind: PlanErrorKind, message: impl Into<String>) -> PlanError {
    PlanError::new(kind, OP, message)
}

/// Cache arguments with every deferred value resolved.
#[derive(Debug, Clone, Default)]
pub struct CacheArgs {
    pub index: Option<SymbolicIndex>,
    pub trigger_index: Option<SymbolicIndex>,
    pub level: Option<usize>,
    pub trigger_level: Option<usize>,
    pub max_elements: Option<usize>,
    pub layout: Option<Layout>,
    pub thrifty: bool,
    pub location: MemorySpace,
    pub indexing: CacheIndexing,
}

impl CacheArgs {
    /// Extract concrete arguments; fails if any deferred value is unresolved.
    pub fn from_options(options: &CacheOptions) -> PlanResult<Self> {
        Ok(Self {
            index: resolve_opt(&options.index)?,
            trigger_index: resolve_opt(&options.trigger_index)?,
            level: resolve_opt(&options.level)?,
            trigger_level: resolve_opt(&options.trigger_level)?,
            max_elements: options.max_elements,
            layout: options.layout.clone(),
            thrifty: options.thrifty,
            location: options.location,
            indexing: options.indexing,
        })
    }
}

/// A validated cache plus the diagnostic tags it implies.
#[derive(Debug, Clone)]
pub struct CachePlacement {
    pub spec: CacheSpec,
    pub tags: Vec<(SymbolicIndex, IndexAttr)>,
}

/// Validates cache requests against a schedule order.
pub struct CacheHierarchyPlanner<'s> {
    schedule: &'s Schedule,
}

impl<'s> CacheHierarchyPlanner<'s> {
    pub fn new(schedule: &'s Schedule) -> Self {
        Self { schedule }
    }

    /// Validate `args` for a cache of `source` and derive the missing views.
    pub fn plan(&self, source: &CacheSource, args: &CacheArgs) -> PlanResult<CachePlacement> {
        if args.thrifty {
            return Err(err(PlanErrorKind::NotImplemented, "thrifty caching is not yet implemented"));
        }

        let sizing_keys = [args.index.is_some(), args.level.is_some(), args.max_elements.is_some()]
            .iter()
            .filter(|&&given| given)
            .count();
        if sizing_keys != 1 {
            return Err(err(
                PlanErrorKind::AmbiguousCacheSize,
                "specify one and only one of index, level, or max_elements",
            ));
        }

        let mut tags = Vec::new();
        let (index, trigger_index, level, trigger_level) = match args.max_elements {
            Some(max_elements) => {
                if max_elements == 0 {
                    return Err(err(
                        PlanErrorKind::InvalidCacheBudget,
                        "max element count specified as a cache budget must be greater than 0",
                    ));
                }
                if args.trigger_index.is_some() || args.trigger_level.is_some() {
                    return Err(err(
                        PlanErrorKind::ConflictingCacheKeys,
                        "a max element cache cannot take a trigger index or trigger level",
                    ));
                }
                (None, None, None, None)
            }
            None => {
                let (index, trigger_index, level, trigger_level) = self.place_by_level(args, &mut tags)?;
                (Some(index), Some(trigger_index), Some(level), Some(trigger_level))
            }
        };

        if let (Some(level), Some(trigger_level)) = (level, trigger_level) {
            if trigger_level > level {
                let role = source.root_array().map(|a| a.role());
                if !role.is_some_and(|r| r.allows_multicache()) {
                    return Err(err(
                        PlanErrorKind::InvalidMulticacheSource,
                        format!("multicaching is only supported for CONST and INPUT arrays, got {:?}", role),
                    ));
                }
            }
        }

        self.check_hierarchy(source, args.max_elements, level, trigger_level)?;

        let layout = args.layout.clone().unwrap_or_else(|| source.layout());
        debug!(
            "cache placed: level={:?} trigger_level={:?} max_elements={:?} layout={:?}",
            level, trigger_level, args.max_elements, layout
        );

        Ok(CachePlacement {
            spec: CacheSpec {
                source: source.clone(),
                index,
                trigger_index,
                level,
                trigger_level,
                max_elements: args.max_elements,
                layout,
                location: args.location,
                indexing: args.indexing,
                thrifty: args.thrifty,
            },
            tags,
        })
    }

    /// Resolve index/level and trigger_index/trigger_level for a level-bounded cache.
    fn place_by_level(
        &self,
        args: &CacheArgs,
        tags: &mut Vec<(SymbolicIndex, IndexAttr)>,
    ) -> PlanResult<(SymbolicIndex, SymbolicIndex, usize, usize)> {
        if args.index.is_some() && (args.level.is_some() || args.trigger_level.is_some()) {
            return Err(err(
                PlanErrorKind::ConflictingCacheKeys,
                "can't specify both a cache index and a cache level or trigger level",
            ));
        }
        if args.level.is_some() && (args.index.is_some() || args.trigger_index.is_some()) {
            return Err(err(
                PlanErrorKind::ConflictingCacheKeys,
                "can't specify both a cache level and a cache index or trigger index",
            ));
        }

        let (index, level) = match (args.index, args.level) {
            (_, Some(level)) => (self.index_at(level, "cache level")?, level),
            (Some(index), None) => {
                let level = self.level_of(&index)?;
                tags.push((index, IndexAttr::Cache));
                (index, level)
            }
            (None, None) => {
                return Err(err(PlanErrorKind::AmbiguousCacheSize, "no cache index or level given"));
            }
        };

        if args.trigger_index.is_some() && args.trigger_level.is_some() {
            return Err(err(
                PlanErrorKind::ConflictingCacheKeys,
                "can't specify both a trigger_index and a trigger_level",
            ));
        }

        let (trigger_index, trigger_level) = match (args.trigger_index, args.trigger_level) {
            (None, None) => (index, level),
            (_, Some(trigger_level)) => (self.index_at(trigger_level, "cache trigger level")?, trigger_level),
            (Some(trigger_index), None) => {
                let trigger_level = self.level_of(&trigger_index)?;
                tags.push((trigger_index, IndexAttr::Trigger));
                (trigger_index, trigger_level)
            }
        };

        if level > trigger_level {
            return Err(err(
                PlanErrorKind::TriggerBeforeLevel,
                format!(
                    "cache level {} must be less than or equal to the cache trigger level {}",
                    level, trigger_level
                ),
            ));
        }

        Ok((index, trigger_index, level, trigger_level))
    }

    fn index_at(&self, level: usize, what: &str) -> PlanResult<SymbolicIndex> {
        if level == 0 {
            return Err(err(
                PlanErrorKind::InvalidCacheLevel,
                format!("{} must be greater than or equal to 1", what),
            ));
        }
        self.schedule.index_at_level(level).ok_or_else(|| {
            err(
                PlanErrorKind::InvalidCacheLevel,
                format!("{} {} exceeds the schedule depth {}", what, level, self.schedule.len()),
            )
        })
    }

    fn level_of(&self, index: &SymbolicIndex) -> PlanResult<usize> {
        self.schedule
            .level_of(index)
            .ok_or_else(|| err(PlanErrorKind::UnknownIndex, format!("index {} is not in the schedule", index)))
    }

    /// An outer cache must strictly enclose the inner one in the same sizing mode.
    fn check_hierarchy(
        &self,
        source: &CacheSource,
        max_elements: Option<usize>,
        level: Option<usize>,
        trigger_level: Option<usize>,
    ) -> PlanResult<()> {
        let outer = match source {
            CacheSource::Array(_) => return Ok(()),
            CacheSource::Cache(handle) => handle.spec().ok_or_else(|| {
                err(PlanErrorKind::UnresolvedParameter, "outer cache is still waiting on its parameters")
            })?,
        };

        match (outer.max_elements, max_elements) {
            (Some(outer_max), Some(inner_max)) => {
                if outer_max <= inner_max {
                    return Err(err(
                        PlanErrorKind::InvalidHierarchyBudget,
                        format!(
                            "outer max element cache ({}) must have a larger budget than the inner cache ({})",
                            outer_max, inner_max
                        ),
                    ));
                }
            }
            (None, None) => {
                let (outer_level, level, trigger_level) = match (outer.level, level, trigger_level) {
                    (Some(o), Some(l), Some(t)) => (o, l, t),
                    _ => {
                        return Err(err(
                            PlanErrorKind::HierarchyModeMismatch,
                            "source cache has neither a cache level nor max_elements",
                        ));
                    }
                };
                if outer_level <= level {
                    return Err(err(
                        PlanErrorKind::InvalidHierarchyLevel,
                        format!(
                            "outer cache level {} must be higher than inner cache level {}",
                            outer_level, level
                        ),
                    ));
                }
                if outer_level < trigger_level {
                    return Err(err(
                        PlanErrorKind::InvalidHierarchyLevel,
                        format!(
                            "outer cache level {} must be at least the inner trigger level {}",
                            outer_level, trigger_level
                        ),
                    ));
                }
            }
            _ => {
                return Err(err(
                    PlanErrorKind::HierarchyModeMismatch,
                    "max element caches can only be nested in other max element caches",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nest::{Array, IterationSpace, Role};
    use crate::plan::cache::CacheHandle;

    fn setup(depth: usize) -> (Schedule, Vec<SymbolicIndex>) {
        let space = IterationSpace::with_extents(&vec![16; depth]);
        let sched = Schedule::new(&space);
        let order = sched.indices().to_vec();
        (sched, order)
    }

    fn input() -> CacheSource {
        Array::new("A", Role::Input, vec![16, 16]).into()
    }

    fn level(l: usize) -> CacheArgs {
        CacheArgs { level: Some(l), ..Default::default() }
    }

    #[test]
    fn test_level_index_round_trip() {
        let (sched, order) = setup(5);
        let planner = CacheHierarchyPlanner::new(&sched);

        for l in 1..=order.len() {
            let by_level = planner.plan(&input(), &level(l)).unwrap();
            assert_eq!(by_level.spec.index, Some(order[order.len() - l]));

            let args = CacheArgs { index: Some(order[order.len() - l]), ..Default::default() };
            let by_index = planner.plan(&input(), &args).unwrap();
            assert_eq!(by_index.spec.level, Some(l));
            assert_eq!(by_index.spec.trigger_level, Some(l));
            assert_eq!(by_index.tags, vec![(order[order.len() - l], IndexAttr::Cache)]);
        }
    }

    #[test]
    fn test_single_sizing_mode() {
        let (sched, order) = setup(3);
        let planner = CacheHierarchyPlanner::new(&sched);

        let cases = [
            CacheArgs::default(),
            CacheArgs { level: Some(1), max_elements: Some(64), ..Default::default() },
            CacheArgs { index: Some(order[0]), max_elements: Some(64), ..Default::default() },
            CacheArgs { index: Some(order[0]), level: Some(1), ..Default::default() },
        ];
        for args in &cases {
            let e = planner.plan(&input(), args).unwrap_err();
            assert_eq!(e.kind, PlanErrorKind::AmbiguousCacheSize);
        }
    }

    #[test]
    fn test_conflicting_keys() {
        let (sched, order) = setup(3);
        let planner = CacheHierarchyPlanner::new(&sched);

        let args = CacheArgs { index: Some(order[2]), trigger_level: Some(2), ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::ConflictingCacheKeys);

        let args = CacheArgs { level: Some(1), trigger_index: Some(order[0]), ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::ConflictingCacheKeys);
    }

    #[test]
    fn test_level_bounds() {
        let (sched, _) = setup(3);
        let planner = CacheHierarchyPlanner::new(&sched);

        assert_eq!(planner.plan(&input(), &level(0)).unwrap_err().kind, PlanErrorKind::InvalidCacheLevel);
        assert_eq!(planner.plan(&input(), &level(4)).unwrap_err().kind, PlanErrorKind::InvalidCacheLevel);

        let args = CacheArgs { level: Some(2), trigger_level: Some(1), ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::TriggerBeforeLevel);

        let args = CacheArgs { level: Some(2), trigger_level: Some(0), ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::InvalidCacheLevel);
    }

    #[test]
    fn test_trigger_by_index() {
        let (sched, order) = setup(4);
        let planner = CacheHierarchyPlanner::new(&sched);

        let args = CacheArgs { index: Some(order[3]), trigger_index: Some(order[1]), ..Default::default() };
        let placed = planner.plan(&input(), &args).unwrap();
        assert_eq!(placed.spec.level, Some(1));
        assert_eq!(placed.spec.trigger_level, Some(3));
        assert_eq!(placed.tags[1], (order[1], IndexAttr::Trigger));
    }

    #[test]
    fn test_multicache_source_roles() {
        let (sched, _) = setup(3);
        let planner = CacheHierarchyPlanner::new(&sched);
        let args = CacheArgs { level: Some(1), trigger_level: Some(2), ..Default::default() };

        let output: CacheSource = Array::new("C", Role::InputOutput, vec![16]).into();
        assert_eq!(planner.plan(&output, &args).unwrap_err().kind, PlanErrorKind::InvalidMulticacheSource);

        let constant: CacheSource = Array::new("W", Role::Const, vec![16]).into();
        assert!(planner.plan(&constant, &args).is_ok());

        // Same-level fill is fine for any role.
        assert!(planner.plan(&output, &level(1)).is_ok());
    }

    #[test]
    fn test_budget() {
        let (sched, _) = setup(2);
        let planner = CacheHierarchyPlanner::new(&sched);

        let args = CacheArgs { max_elements: Some(0), ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::InvalidCacheBudget);

        let args = CacheArgs { max_elements: Some(256), ..Default::default() };
        let placed = planner.plan(&input(), &args).unwrap();
        assert!(placed.spec.level.is_none());
        assert!(placed.spec.index.is_none());
        assert!(placed.spec.is_budget_bounded());
    }

    #[test]
    fn test_hierarchy_levels() {
        let (sched, _) = setup(4);
        let planner = CacheHierarchyPlanner::new(&sched);

        let outer = CacheHandle::complete_new(planner.plan(&input(), &level(3)).unwrap().spec);
        assert!(planner.plan(&(&outer).into(), &level(2)).is_ok());

        let outer = CacheHandle::complete_new(planner.plan(&input(), &level(2)).unwrap().spec);
        let e = planner.plan(&(&outer).into(), &level(3)).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::InvalidHierarchyLevel);
        let e = planner.plan(&(&outer).into(), &level(2)).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::InvalidHierarchyLevel);
    }

    #[test]
    fn test_hierarchy_trigger_inside_outer() {
        let (sched, _) = setup(4);
        let planner = CacheHierarchyPlanner::new(&sched);
        let outer = CacheHandle::complete_new(planner.plan(&input(), &level(3)).unwrap().spec);

        let args = CacheArgs { level: Some(1), trigger_level: Some(4), ..Default::default() };
        let e = planner.plan(&(&outer).into(), &args).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::InvalidHierarchyLevel);

        let args = CacheArgs { level: Some(1), trigger_level: Some(3), ..Default::default() };
        assert!(planner.plan(&(&outer).into(), &args).is_ok());
    }

    #[test]
    fn test_hierarchy_budget_and_mode() {
        let (sched, _) = setup(3);
        let planner = CacheHierarchyPlanner::new(&sched);
        let budget = |n| CacheArgs { max_elements: Some(n), ..Default::default() };

        let outer = CacheHandle::complete_new(planner.plan(&input(), &budget(1024)).unwrap().spec);
        assert!(planner.plan(&(&outer).into(), &budget(256)).is_ok());
        let e = planner.plan(&(&outer).into(), &budget(1024)).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::InvalidHierarchyBudget);

        let e = planner.plan(&(&outer).into(), &level(1)).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::HierarchyModeMismatch);

        let leveled = CacheHandle::complete_new(planner.plan(&input(), &level(3)).unwrap().spec);
        let e = planner.plan(&(&leveled).into(), &budget(16)).unwrap_err();
        assert_eq!(e.kind, PlanErrorKind::HierarchyModeMismatch);
    }

    #[test]
    fn test_layout_inherited() {
        let (sched, _) = setup(2);
        let planner = CacheHierarchyPlanner::new(&sched);
        let source: CacheSource = Array::new("A", Role::Input, vec![4, 4]).with_layout(Layout::LastMajor).into();

        let placed = planner.plan(&source, &level(1)).unwrap();
        assert_eq!(placed.spec.layout, Layout::LastMajor);

        let args = CacheArgs { level: Some(1), layout: Some(Layout::FirstMajor), ..Default::default() };
        assert_eq!(planner.plan(&source, &args).unwrap().spec.layout, Layout::FirstMajor);
    }

    #[test]
    fn test_thrifty_rejected() {
        let (sched, _) = setup(2);
        let planner = CacheHierarchyPlanner::new(&sched);
        let args = CacheArgs { level: Some(1), thrifty: true, ..Default::default() };
        assert_eq!(planner.plan(&input(), &args).unwrap_err().kind, PlanErrorKind::NotImplemented);
    }
}
