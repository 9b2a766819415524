//! Benchmarks for the resource components.
//!
//! Benchmarks cover:
//! - Priority heap push/pop
//! - Connection pool acquire/release round trips
//! - Memory cache set/get with LRU pressure
//! - Task queue end-to-end throughput

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use resource_manager::config::{ConnectionPoolConfig, MemoryCacheConfig, TaskQueueConfig};
use resource_manager::core::{AsyncTaskQueue, ConnectionFactory, ConnectionPool, MemoryCache};
use resource_manager::infra::queue::PriorityQueue;
use resource_manager::util::serde::Priority;

use tokio::runtime::Runtime;

// ============================================================================
// Helpers
// ============================================================================

struct NullFactory;

impl ConnectionFactory for NullFactory {
    type Connection = u64;
    type Error = std::convert::Infallible;

    fn connect(&self) -> Result<u64, Self::Error> {
        Ok(0)
    }

    fn is_valid(&self, _conn: &mut u64) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ============================================================================
// Priority Heap Benchmarks
// ============================================================================

fn bench_priority_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push_pop");

    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = PriorityQueue::with_capacity(size as usize);
                for i in 0..size {
                    q.push(Priority((i % 10) as u8), i);
                }
                while let Some(item) = q.pop() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Connection Pool Benchmarks
// ============================================================================

fn bench_pool_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");

    for (pool_size, overflow) in [(1usize, 0usize), (10, 5)] {
        let pool = ConnectionPool::new(
            NullFactory,
            ConnectionPoolConfig::new()
                .with_pool_size(pool_size)
                .with_max_overflow(overflow),
        )
        .expect("pool config is valid");

        group.bench_function(BenchmarkId::new("single", pool_size), |b| {
            b.iter(|| {
                let conn = pool.acquire(Duration::from_millis(100)).expect("idle connection");
                pool.release(black_box(conn));
            });
        });
    }
    group.finish();
}

// ============================================================================
// Memory Cache Benchmarks
// ============================================================================

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_cache");

    for max_size in [64usize, 1_000] {
        let cache = MemoryCache::<String, u64>::new(
            &MemoryCacheConfig::new().with_max_size(max_size),
        );
        let keys: Vec<String> = (0..2_000).map(|i| format!("key-{i}")).collect();

        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::new("set_get", max_size), &keys, |b, keys| {
            b.iter(|| {
                for (i, key) in keys.iter().enumerate() {
                    cache.set(key.clone(), i as u64, None);
                    black_box(cache.get(key.as_str()));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Task Queue Benchmarks
// ============================================================================

fn bench_task_queue(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("task_queue_throughput");
    group.sample_size(20);

    for batch in [100u64, 1_000] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::new("async", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async move {
                let queue = AsyncTaskQueue::new(
                    TaskQueueConfig::new()
                        .with_max_workers(4)
                        .with_blocking_threads(2),
                )
                .expect("queue config is valid");
                queue.start(None).expect("runtime present");

                let mut handles = Vec::with_capacity(batch as usize);
                for i in 0..batch {
                    handles.push(
                        queue
                            .submit_async(async move { Ok(i * 2) }, Priority((i % 10) as u8))
                            .await
                            .expect("queue running"),
                    );
                }
                for handle in handles {
                    black_box(handle.await.expect("task succeeds"));
                }
                queue.stop().await;
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_priority_queue,
    bench_pool_round_trip,
    bench_cache,
    bench_task_queue
);
criterion_main!(benches);
