//! # Pool Performance Benchmark
//!
//! Measures the acquire/release fast path in every thread-safety mode and
//! the typed object pool on top of it.
//!
//! Run with: `cargo bench --package tidepool_core --bench pool_benchmark`

// Benchmarks don't need docs and may have intentionally unused code
#![allow(missing_docs)]
#![allow(dead_code)]

use std::hint::black_box;

use bytemuck::{Pod, Zeroable};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tidepool_core::{
    FixedBlockPool, ObjectPool, ObjectPoolConfig, OverflowPolicy, PoolConfig, Poolable,
    ThreadSafety,
};

const CAPACITY: usize = 4096;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    ttl: u32,
    flags: u32,
}

impl Poolable for Particle {
    fn reset(&mut self) {
        *self = Self::zeroed();
        self.ttl = 120;
    }
}

/// Benchmark: one acquire + release pair per iteration.
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");

    for mode in [ThreadSafety::None, ThreadSafety::Locked, ThreadSafety::LockFree] {
        let pool =
            FixedBlockPool::new(PoolConfig::new(64, CAPACITY).with_thread_safety(mode)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{mode:?}")), &pool, |b, pool| {
            b.iter(|| {
                let handle = pool.acquire().unwrap();
                pool.release(black_box(handle)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark: drain the whole pool, then refill it.
fn bench_drain_refill(c: &mut Criterion) {
    let pool = FixedBlockPool::new(PoolConfig::new(64, CAPACITY)).unwrap();
    let mut handles = Vec::with_capacity(CAPACITY);

    c.bench_function("drain_refill_4096", |b| {
        b.iter(|| {
            handles.extend((0..CAPACITY).map(|_| pool.acquire().unwrap()));
            for handle in handles.drain(..) {
                pool.release(handle).unwrap();
            }
        });
    });
}

/// Benchmark: typed acquire runs the reset hook and a slot write.
fn bench_object_pool(c: &mut Criterion) {
    let pool = ObjectPool::<Particle>::new(ObjectPoolConfig::new(CAPACITY, OverflowPolicy::Reject))
        .unwrap();

    c.bench_function("object_pool_particle", |b| {
        b.iter(|| {
            let handle = pool.acquire().unwrap();
            pool.update(handle, |p| p.position[0] += 1.0).unwrap();
            pool.release(black_box(handle)).unwrap();
        });
    });
}

criterion_group!(benches, bench_acquire_release, bench_drain_refill, bench_object_pool);
criterion_main!(benches);
