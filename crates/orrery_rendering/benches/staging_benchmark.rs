//! # Transform Staging Benchmark
//!
//! Cost of getting N object transforms into a slot's GPU buffers through
//! the headless backend, legacy blocks against one instanced batch.
//!
//! Run with: cargo bench --bench staging_benchmark

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orrery_core::math::{self, IDENTITY};
use orrery_core::{AcquirePolicy, BindingMode, FrameRing};
use orrery_rendering::{HeadlessBackend, ObjectTransform, TransformBufferManager, TransformData};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_models(count: usize) -> Vec<math::Mat4> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..count)
        .map(|_| {
            math::translation(
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
                rng.gen_range(-100.0..100.0),
            )
        })
        .collect()
}

fn bench_staging(c: &mut Criterion) {
    let view = math::look_at([0.0, 5.0, 10.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    let proj = math::perspective(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 1000.0);
    let view_proj = math::compose_view_proj(&view, &proj);

    let mut group = c.benchmark_group("staging");
    for count in [256usize, 4_096] {
        let models = random_models(count);
        let objects: Vec<ObjectTransform> = models
            .iter()
            .map(|&model| ObjectTransform::new(model, view, proj))
            .collect();

        let backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(1, AcquirePolicy::NonBlocking);
        let mut buffers = TransformBufferManager::new(&backend, 1, 1, 1);
        buffers
            .ensure_capacity(&backend, &ring, BindingMode::Legacy, count)
            .unwrap();
        buffers
            .ensure_capacity(&backend, &ring, BindingMode::Instanced, count)
            .unwrap();
        let slot = ring.acquire_slot_for_writing().unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("legacy", count), &objects, |b, objects| {
            b.iter(|| {
                buffers.reset(slot);
                buffers.write(slot, TransformData::Legacy(objects)).unwrap();
                backend.clear_writes();
                black_box(buffers.flush(&backend, slot))
            });
        });

        group.bench_with_input(BenchmarkId::new("instanced", count), &models, |b, models| {
            b.iter(|| {
                buffers.reset(slot);
                buffers
                    .write(slot, TransformData::Instanced { view_proj, models })
                    .unwrap();
                backend.clear_writes();
                black_box(buffers.flush(&backend, slot))
            });
        });
    }
    group.finish();
}

fn bench_legacy_identity_blocks(c: &mut Criterion) {
    let backend = HeadlessBackend::new();
    let mut ring = FrameRing::new(1, AcquirePolicy::NonBlocking);
    let mut buffers = TransformBufferManager::new(&backend, 1, 1, 1);
    let slot = ring.acquire_slot_for_writing().unwrap();
    let object = ObjectTransform::new(IDENTITY, IDENTITY, IDENTITY);

    c.bench_function("single_legacy_object", |b| {
        b.iter(|| {
            buffers.reset(slot);
            buffers
                .write(slot, TransformData::Legacy(std::slice::from_ref(&object)))
                .unwrap();
            backend.clear_writes();
            black_box(buffers.flush(&backend, slot))
        });
    });
}

criterion_group!(benches, bench_staging, bench_legacy_identity_blocks);
criterion_main!(benches);
