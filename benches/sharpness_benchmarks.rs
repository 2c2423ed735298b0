//! Benchmarks for the Laplacian-variance sharpness metric.
//!
//! The metric runs once per focus probe and once per capture verification,
//! so its cost directly bounds sweep throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use slidescan::quality::laplacian_variance;
use slidescan::testing::{checkerboard_frame, flat_frame, gradient_frame};

fn bench_laplacian_variance(c: &mut Criterion) {
    let mut group = c.benchmark_group("laplacian_variance");

    let checker = checkerboard_frame(640, 480, 120);
    group.bench_function("checkerboard_640x480", |b| {
        b.iter(|| laplacian_variance(black_box(&checker)))
    });

    let gradient = gradient_frame(0, 640, 480);
    group.bench_function("gradient_640x480", |b| {
        b.iter(|| laplacian_variance(black_box(&gradient)))
    });

    let flat = flat_frame(1920, 1080, 128);
    group.bench_function("flat_1920x1080", |b| {
        b.iter(|| laplacian_variance(black_box(&flat)))
    });

    group.finish();
}

criterion_group!(benches, bench_laplacian_variance);
criterion_main!(benches);
