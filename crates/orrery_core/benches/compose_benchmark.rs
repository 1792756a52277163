//! # Transform Composition Benchmark
//!
//! Measures the per-object cost of building `projection · view · model`
//! against composing the shared view-projection once and applying only the
//! model per object, which is what the instanced path does on the GPU.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orrery_core::math;

fn models(count: usize) -> Vec<math::Mat4> {
    (0..count)
        .map(|i| {
            let f = i as f32;
            math::multiply(&math::translation(f, -f, f * 0.5), &math::rotation_y(f * 0.01))
        })
        .collect()
}

fn bench_compose(c: &mut Criterion) {
    let view = math::look_at([0.0, 5.0, 10.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    let proj = math::perspective(std::f32::consts::FRAC_PI_4, 16.0 / 9.0, 0.1, 1000.0);

    let mut group = c.benchmark_group("compose");
    for count in [1_000usize, 10_000] {
        let models = models(count);

        group.bench_with_input(BenchmarkId::new("full_mvp", count), &models, |b, models| {
            b.iter(|| {
                let mut acc = 0.0f32;
                for model in models {
                    acc += math::compose(model, &view, &proj)[3][3];
                }
                black_box(acc)
            });
        });

        group.bench_with_input(BenchmarkId::new("shared_view_proj", count), &models, |b, models| {
            b.iter(|| {
                let view_proj = math::compose_view_proj(&view, &proj);
                let mut acc = 0.0f32;
                for model in models {
                    acc += math::multiply(&view_proj, model)[3][3];
                }
                black_box(acc)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
