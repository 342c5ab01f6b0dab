//! Benchmarks for the memory storage backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skp_ratelimit::{MemoryStorage, MovingWindowStorage, Storage};
use tokio::runtime::Runtime;

fn bench_storage_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage");

    group.bench_function("get_existing", |b| {
        let storage = MemoryStorage::new();
        rt.block_on(async {
            storage.incr("bench:key", 3600, false, 1).await.unwrap();
        });
        b.iter(|| rt.block_on(async { black_box(storage.get("bench:key").await) }))
    });

    group.bench_function("get_missing", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.get("nonexistent:key").await) }))
    });

    group.bench_function("incr_fresh_key", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:incr:{i}");
            rt.block_on(async { black_box(storage.incr(&key, 3600, false, 1).await) })
        })
    });

    group.bench_function("incr_hot_key", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.incr("hotkey", 3600, false, 1).await) }))
    });

    group.bench_function("acquire_entry", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:entry:{}", i % 1000);
            rt.block_on(async { black_box(storage.acquire_entry(&key, 1_000_000, 3600).await) })
        })
    });

    group.finish();
}

fn bench_storage_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage_scaling");

    for num_keys in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("get_with_entries", num_keys), num_keys, |b, &num_keys| {
            let storage = MemoryStorage::new();

            rt.block_on(async {
                for i in 0..num_keys {
                    let key = format!("scale:{i}");
                    storage.incr(&key, 3600, false, 1).await.unwrap();
                }
            });

            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("scale:{}", i % num_keys);
                rt.block_on(async { black_box(storage.get(&key).await) })
            })
        });
    }

    group.finish();
}

fn bench_concurrent_access(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent_access");

    group.bench_function("incr_same_key", |b| {
        let storage = MemoryStorage::new();
        b.iter(|| rt.block_on(async { black_box(storage.incr("hotkey", 3600, false, 1).await) }))
    });

    group.bench_function("incr_distributed_keys", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("dist:{}", i % 1000);
            rt.block_on(async { black_box(storage.incr(&key, 3600, false, 1).await) })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_storage_operations, bench_storage_scaling, bench_concurrent_access);
criterion_main!(benches);
