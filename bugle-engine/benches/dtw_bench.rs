//! DTW Alignment Performance Benchmark
//!
//! Measures warp-distance throughput for typical feature sequence lengths.
//!
//! **Goal:** per-chunk comparisons must fit inside a realtime budget
//! **Target:** a 200x200 banded comparison well under 1 ms

use bugle_engine::audio::dtw::{DtwComparator, DtwConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sequence(len: usize, offset: f32) -> Vec<Vec<f32>> {
    (0..len)
        .map(|i| {
            (0..13)
                .map(|k| offset + ((i * 13 + k) as f32 * 0.37).sin())
                .collect()
        })
        .collect()
}

fn bench_dtw(c: &mut Criterion) {
    let mut group = c.benchmark_group("dtw");

    let live = sequence(200, 0.0);
    let master = sequence(180, 0.2);

    group.bench_function("banded_200x180", |b| {
        let mut dtw = DtwComparator::new(DtwConfig::default());
        b.iter(|| black_box(dtw.compare(black_box(&live), black_box(&master))));
    });

    group.bench_function("unbanded_200x180", |b| {
        let mut dtw = DtwComparator::new(DtwConfig {
            use_window: false,
            ..Default::default()
        });
        b.iter(|| black_box(dtw.compare(black_box(&live), black_box(&master))));
    });

    group.bench_function("scalar_distance_200x180", |b| {
        let mut dtw = DtwComparator::new(DtwConfig {
            enable_simd: false,
            ..Default::default()
        });
        b.iter(|| black_box(dtw.compare(black_box(&live), black_box(&master))));
    });

    let short_live = sequence(40, 0.0);
    group.bench_function("banded_40x180_early_session", |b| {
        let mut dtw = DtwComparator::new(DtwConfig::default());
        b.iter(|| black_box(dtw.compare(black_box(&short_live), black_box(&master))));
    });

    group.finish();
}

criterion_group!(benches, bench_dtw);
criterion_main!(benches);
