//! Benchmarks for plan description and build.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nestplan::prelude::*;

fn matmul_schedule() -> (IterationSpace, Schedule) {
    let space = IterationSpace::new(&[("i", 256), ("j", 256), ("k", 256)]);
    let mut schedule = Schedule::new(&space);
    for d in 0..3 {
        if let Some(index) = space.index(d) {
            let _ = schedule.split(index, 16);
        }
    }
    (space, schedule)
}

/// Benchmark describing a tiled matmul plan with a cache hierarchy.
fn bench_describe(c: &mut Criterion) {
    let (space, schedule) = matmul_schedule();
    let b_array = Array::new("B", Role::Const, vec![256, 256]);

    c.bench_function("describe_matmul", |b| {
        b.iter(|| {
            let mut plan = Plan::new(&schedule, Target::host());
            plan.parallelize(space.index(0).unwrap(), None, ParallelPolicy::Static).unwrap();
            let outer = plan.cache(&b_array, CacheOptions::new().level(black_box(4usize))).unwrap();
            plan.cache(&outer, CacheOptions::new().level(2usize)).unwrap();
            plan.unroll(schedule.index_by_name("j_in").unwrap()).unwrap();
            plan
        })
    });
}

/// Benchmark replaying deferred calls and building against the trace engine.
fn bench_build(c: &mut Criterion) {
    let (_, schedule) = matmul_schedule();
    let b_array = Array::new("B", Role::Const, vec![256, 256]);
    let mut engine = TraceEngine::new();
    let mapping = engine.map_nest(&schedule, &[b_array.clone()]);

    c.bench_function("build_deferred_matmul", |b| {
        b.iter(|| {
            let level: Deferred<usize> = Deferred::new("L");
            let index: Deferred<SymbolicIndex> = Deferred::new("U");
            let mut plan = Plan::new(&schedule, Target::host());
            plan.cache(&b_array, CacheOptions::new().level(&level)).unwrap();
            plan.unroll(&index).unwrap();
            level.resolve(black_box(3)).unwrap();
            index.resolve(schedule.indices()[5]).unwrap();
            plan.build(&mut engine, &mapping).unwrap()
        })
    });
}

criterion_group!(benches, bench_describe, bench_build);
criterion_main!(benches);
