//! DTW alignment throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cf_core::FeatureMatrix;
use cf_sim::DtwEngine;

fn synthetic(frames: usize, coeffs: usize, step: f32) -> FeatureMatrix {
    let mut m = FeatureMatrix::new(coeffs);
    let mut row = vec![0.0f32; coeffs];
    for f in 0..frames {
        for (c, v) in row.iter_mut().enumerate() {
            *v = (f as f32 * step + c as f32 * 0.7).sin() * 2.0;
        }
        m.push_row(&row).unwrap();
    }
    m
}

fn bench_full_distance(c: &mut Criterion) {
    let engine = DtwEngine::new(50);
    let session = synthetic(200, 13, 0.2);
    let master = synthetic(400, 13, 0.23);

    c.bench_function("dtw_distance_200x400", |b| {
        b.iter(|| {
            black_box(
                engine
                    .distance(black_box(&session), black_box(&master))
                    .unwrap(),
            )
        });
    });
}

fn bench_subsequence(c: &mut Criterion) {
    let engine = DtwEngine::new(50);
    let query = synthetic(120, 13, 0.2);
    let master = synthetic(800, 13, 0.2);

    c.bench_function("dtw_subsequence_120_in_800", |b| {
        b.iter(|| {
            black_box(
                engine
                    .subsequence_distance(black_box(&query), black_box(&master))
                    .unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_full_distance, bench_subsequence);
criterion_main!(benches);
