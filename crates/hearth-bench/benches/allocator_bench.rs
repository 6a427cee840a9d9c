//! Allocator benchmarks.
//!
//! Create/destroy stay outside the timed regions; reset is timed where the
//! workload depends on it.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use hearth_core::{PoolAllocator, ScratchAllocator, StackAllocator, Strategy};

fn bench_scratch_alloc_reset(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024];
    let mut group = c.benchmark_group("scratch_alloc_reset");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });

        let mut scratch = ScratchAllocator::create(1 << 20, 16).expect("scratch");
        group.bench_with_input(BenchmarkId::new("scratch", size), &size, |b, &sz| {
            b.iter(|| {
                match scratch.alloc(sz, 16) {
                    Some(ptr) => {
                        criterion::black_box(ptr);
                    }
                    None => {
                        scratch.reset().expect("reset");
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_stack_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_scope");

    let mut stack = StackAllocator::create(1 << 20, 16, Strategy::Eager).expect("stack");
    group.bench_function("record_alloc_unwind", |b| {
        b.iter(|| {
            stack.record().expect("record");
            let ptr = stack.alloc(256, 16).expect("alloc");
            criterion::black_box(ptr);
            stack.unwind().expect("unwind");
        });
    });

    group.finish();
}

fn bench_pool_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_cycle");

    let mut pool = PoolAllocator::create(64, 1024, 16).expect("pool");
    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let slot = pool.acquire().expect("slot");
            criterion::black_box(slot);
            pool.release(slot).expect("release");
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_scratch_alloc_reset,
    bench_stack_scope,
    bench_pool_cycle
);
criterion_main!(benches);
