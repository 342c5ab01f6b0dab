//! Benchmarks for rate limiting strategies.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skp_ratelimit::{FixedWindow, Identity, Limit, MemoryStorage, MovingWindow, SlidingWindowCounter, Strategy};
use tokio::runtime::Runtime;

fn bench_strategies(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let limit = Limit::new(1000, 60, "minute");

    let mut group = c.benchmark_group("strategies");

    group.bench_function("fixed_window", |b| {
        let storage = MemoryStorage::new();
        let strategy = FixedWindow::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let identity = Identity::new("bench").with(format!("k:{}", i % 100));
            rt.block_on(async { black_box(strategy.hit(&storage, &limit, &identity).await) })
        })
    });

    group.bench_function("moving_window", |b| {
        let storage = MemoryStorage::new();
        let strategy = MovingWindow::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let identity = Identity::new("bench").with(format!("k:{}", i % 100));
            rt.block_on(async { black_box(strategy.hit(&storage, &limit, &identity).await) })
        })
    });

    group.bench_function("sliding_window_counter", |b| {
        let storage = MemoryStorage::new();
        let strategy = SlidingWindowCounter::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let identity = Identity::new("bench").with(format!("k:{}", i % 100));
            rt.block_on(async { black_box(strategy.hit(&storage, &limit, &identity).await) })
        })
    });

    group.finish();
}

fn bench_strategy_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let limit = Limit::new(1000, 60, "minute");

    let mut group = c.benchmark_group("strategy_key_scaling");

    for num_keys in [1, 10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("fixed_window", num_keys), num_keys, |b, &num_keys| {
            let storage = MemoryStorage::new();
            let strategy = FixedWindow::new();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let identity = Identity::new("bench").with(format!("k:{}", i % num_keys));
                rt.block_on(async { black_box(strategy.hit(&storage, &limit, &identity).await) })
            })
        });

        group.bench_with_input(BenchmarkId::new("moving_window", num_keys), num_keys, |b, &num_keys| {
            let storage = MemoryStorage::new();
            let strategy = MovingWindow::new();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let identity = Identity::new("bench").with(format!("k:{}", i % num_keys));
                rt.block_on(async { black_box(strategy.hit(&storage, &limit, &identity).await) })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies, bench_strategy_scaling);
criterion_main!(benches);
