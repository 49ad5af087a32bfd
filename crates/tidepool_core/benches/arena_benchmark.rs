//! # Arena Performance Benchmark
//!
//! Measures bump allocation and the per-scope reset.
//!
//! Run with: `cargo bench --package tidepool_core --bench arena_benchmark`

// Benchmarks don't need docs and may have intentionally unused code
#![allow(missing_docs)]
#![allow(dead_code)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tidepool_core::Arena;

const ARENA_BYTES: usize = 1024 * 1024;

/// Benchmark: fill a 1 MiB arena with fixed-size requests, then reset.
fn bench_fill_and_reset(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_fill_reset");

    for size in [16usize, 64, 256] {
        let mut arena = Arena::new(ARENA_BYTES).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                while let Ok(ptr) = arena.allocate(size, 8) {
                    black_box(ptr);
                }
                arena.reset();
            });
        });
    }

    group.finish();
}

/// Benchmark: one scope with a handful of typed scratch slices.
fn bench_scoped_scratch(c: &mut Criterion) {
    let mut arena = Arena::new(ARENA_BYTES).unwrap();

    c.bench_function("arena_scope_scratch", |b| {
        b.iter(|| {
            let mut scope = arena.scope();
            let positions = scope.alloc_slice::<[f32; 3]>(1024).unwrap();
            let ids = scope.alloc_slice::<u32>(1024).unwrap();
            scope.slice_mut::<u32>(ids).unwrap()[0] = 1;
            black_box(scope.slice::<[f32; 3]>(positions).unwrap().len())
        });
    });
}

criterion_group!(benches, bench_fill_and_reset, bench_scoped_scratch);
criterion_main!(benches);
