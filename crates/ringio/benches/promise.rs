//! Benchmarks for promise resolution and exchange entry pooling

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ringio::{all_of, ExchangeEntryPool, Promise};

/// Resolve with continuations attached before and after resolution
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_resolve");

    for &attached in &[0usize, 1, 4, 16] {
        group.throughput(Throughput::Elements(attached as u64 + 1));
        group.bench_function(format!("{}_actions", attached), |b| {
            b.iter(|| {
                let p = Promise::<u64>::new();
                for _ in 0..attached {
                    p.on_success(|v| {
                        black_box(*v);
                    });
                }
                p.success(42);
                black_box(p.peek().is_some())
            })
        });
    }

    group.bench_function("attach_after_resolve", |b| {
        let p = Promise::ok(7u64);
        b.iter(|| {
            p.on_success(|v| {
                black_box(*v);
            });
        })
    });

    group.finish();
}

/// Chains of map over a pending promise
fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("promise_map");

    for &depth in &[1usize, 8, 32] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_function(format!("depth_{}", depth), |b| {
            b.iter(|| {
                let root = Promise::<u64>::new();
                let mut tail = root.map(|v| v + 1);
                for _ in 1..depth {
                    tail = tail.map(|v| v + 1);
                }
                root.success(0);
                black_box(tail.join())
            })
        });
    }

    group.bench_function("all_of_64", |b| {
        b.iter(|| {
            let inputs: Vec<Promise<u32>> = (0..64).map(|_| Promise::new()).collect();
            let all = all_of(inputs.clone());
            for (i, p) in inputs.iter().enumerate() {
                p.success(i as u32);
            }
            black_box(all.join())
        })
    });

    group.finish();
}

/// Exchange entry acquisition
fn bench_entry_pool(c: &mut Criterion) {
    let mut pool = ExchangeEntryPool::new(1024);

    c.bench_function("entry_acquire_release", |b| {
        b.iter(|| {
            let key = pool.acquire().map(|e| e.key());
            if let Some(key) = key {
                pool.release(black_box(key));
            }
        })
    });

    c.bench_function("entry_acquire_256_release", |b| {
        let mut keys = Vec::with_capacity(256);
        b.iter(|| {
            for _ in 0..256 {
                if let Some(entry) = pool.acquire() {
                    keys.push(entry.key());
                }
            }
            for key in keys.drain(..) {
                pool.release(key);
            }
        })
    });
}

criterion_group!(benches, bench_resolve, bench_map_chain, bench_entry_pool);
criterion_main!(benches);
