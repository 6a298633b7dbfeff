//! Performance benchmarks for view-counter
//!
//! Run with: cargo bench
//!
//! These benchmarks measure bump throughput on hot and spread keys, bump
//! contention across threads, and the cost of a drain into an in-memory sink.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Runtime;

use view_counter::clock::SystemClock;
use view_counter::counter::ShardedCounterMap;
use view_counter::flush::FlushEngine;
use view_counter::metrics::CounterMetrics;
use view_counter::store::MemorySink;
use view_counter::ShardedCounter;

fn create_runtime() -> Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

/// Single-threaded bumps on one key vs many keys.
fn bench_bump(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump");
    group.throughput(Throughput::Elements(1));

    group.bench_function("same_key", |b| {
        let map = ShardedCounterMap::<u64>::new();
        b.iter(|| map.bump(black_box(42)));
    });

    group.bench_function("spread_keys", |b| {
        let map = ShardedCounterMap::<u64>::new();
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            map.bump(black_box(i))
        });
    });

    group.bench_function("string_key", |b| {
        let map = ShardedCounterMap::<String>::new();
        b.iter(|| map.bump(black_box("/t/rust-ownership".to_string())));
    });

    group.finish();
}

/// Concurrent bumps from several threads.
fn bench_bump_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_contention");
    let per_thread = 10_000u64;

    for threads in [1usize, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*threads as u64 * per_thread));

        group.bench_with_input(BenchmarkId::new("hot_key", threads), threads, |b, &n| {
            b.iter(|| {
                let map = Arc::new(ShardedCounterMap::<u64>::new());
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let map = Arc::clone(&map);
                        thread::spawn(move || {
                            for _ in 0..per_thread {
                                map.bump(7);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                black_box(map.pending(&7));
            });
        });

        group.bench_with_input(BenchmarkId::new("own_keys", threads), threads, |b, &n| {
            b.iter(|| {
                let map = Arc::new(ShardedCounterMap::<u64>::new());
                let handles: Vec<_> = (0..n)
                    .map(|t| {
                        let map = Arc::clone(&map);
                        thread::spawn(move || {
                            for i in 0..per_thread {
                                map.bump(t as u64 * 1_000 + i % 1_000);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                black_box(map.len());
            });
        });
    }

    group.finish();
}

/// Drain of N pending keys into a memory sink.
fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");
    let rt = create_runtime();

    for keys in [100u64, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*keys));

        group.bench_with_input(BenchmarkId::from_parameter(keys), keys, |b, &keys| {
            let map = Arc::new(ShardedCounterMap::<u64>::new());
            let engine = FlushEngine::new(
                "bench_views",
                Arc::clone(&map),
                Arc::new(MemorySink::<u64>::new()),
                None,
                Arc::new(SystemClock),
                Arc::new(CounterMetrics::new()),
            );

            b.iter(|| {
                for key in 0..keys {
                    map.bump(key);
                }
                let report = rt.block_on(engine.drain()).unwrap();
                black_box(report);
            });
        });
    }

    group.finish();
}

/// Striped counter used for the bump metric.
fn bench_sharded_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharded_counter");

    group.bench_function("increment", |b| {
        let counter = ShardedCounter::new();
        b.iter(|| counter.increment());
    });

    group.bench_function("sum", |b| {
        let counter = ShardedCounter::new();
        counter.add(1_000);
        b.iter(|| black_box(counter.sum()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_bump,
    bench_bump_contention,
    bench_drain,
    bench_sharded_counter
);
criterion_main!(benches);
