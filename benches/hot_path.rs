//! Benchmarks for the two paths every allocation call pays for regardless
//! of whether it ends up sampled: the debt subtract-and-test in
//! [`poireau::Sampler::test`] and a tracked allocate/release round trip
//! through [`poireau::TrackedRegistry`].

use criterion::{criterion_group, criterion_main, Criterion};
use poireau::{Sampler, TrackedRegistry};
use std::hint::black_box;

fn bench_sampler_test(c: &mut Criterion) {
    c.bench_function("sampler_test_unsampled", |b| {
        b.iter(|| black_box(Sampler::test(black_box(64))));
    });
}

fn bench_registry_round_trip(c: &mut Criterion) {
    c.bench_function("registry_get_put_round_trip", |b| {
        b.iter(|| {
            let (ptr, id) = TrackedRegistry::get(black_box(4096)).expect("mmap should succeed");
            black_box(id);
            TrackedRegistry::put(ptr);
        });
    });
}

criterion_group!(benches, bench_sampler_test, bench_registry_round_trip);
criterion_main!(benches);
