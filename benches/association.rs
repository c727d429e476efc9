//! Criterion benchmarks for the association engine.
//!
//! Run with: cargo bench
//! Run specific group: cargo bench -- jcbb

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::DMatrix;

use landmark_assoc_rs::prelude::*;

/// Deterministic field of landmarks on a jittered grid with observations
/// offset from every other landmark.
fn scenario(num_predictions: usize) -> (DMatrix<f64>, DMatrix<f64>, PredictionCovariance) {
    let mut pred_rows = Vec::with_capacity(num_predictions * 2);
    for j in 0..num_predictions {
        // Low-discrepancy jitter keeps the layout irregular but repeatable
        let jitter = ((j * 2654435761) % 1000) as f64 / 1000.0;
        pred_rows.push((j % 8) as f64 * 12.0 + jitter);
        pred_rows.push((j / 8) as f64 * 12.0 - jitter);
    }
    let predictions = DMatrix::from_row_slice(num_predictions, 2, &pred_rows);

    let num_observations = num_predictions / 2;
    let mut obs_rows = Vec::with_capacity(num_observations * 2);
    for k in 0..num_observations {
        let j = k * 2;
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        obs_rows.push(predictions[(j, 0)] + sign * 0.3);
        obs_rows.push(predictions[(j, 1)] - sign * 0.3);
    }
    let observations = DMatrix::from_row_slice(num_observations, 2, &obs_rows);

    let blocks = (0..num_predictions)
        .map(|_| DMatrix::identity(2, 2) * 0.5)
        .collect();
    (observations, predictions, PredictionCovariance::Independent(blocks))
}

fn bench_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("association");

    for &n in &[16usize, 48, 96] {
        let (observations, predictions, covariance) = scenario(n);

        group.bench_with_input(BenchmarkId::new("nn", n), &n, |b, _| {
            let config = AssociationConfig::nearest_neighbor();
            b.iter(|| associate(&observations, &predictions, &covariance, &config).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("jcbb", n), &n, |b, _| {
            let config = AssociationConfig::jcbb();
            b.iter(|| associate(&observations, &predictions, &covariance, &config).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("jcbb_no_index", n), &n, |b, _| {
            let mut config = AssociationConfig::jcbb();
            config.use_spatial_index = false;
            b.iter(|| associate(&observations, &predictions, &covariance, &config).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_methods);
criterion_main!(benches);
