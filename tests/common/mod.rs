//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use mltk::dataset::{Data, Point};
use tracing_subscriber::EnvFilter;

/// Route learner logs to the test output; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two points per class on the diagonal
pub fn four_points() -> Arc<Data<f64>> {
    Data::from_rows(
        vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
        vec![-1.0, -1.0, 1.0, 1.0],
    )
    .unwrap()
    .shared()
}

/// 3×3 integer grids with lower-left corners at `corners`, labelled by
/// position in `labels`
pub fn grid_blobs(corners: &[(f64, f64)], labels: &[f64]) -> Arc<Data<f64>> {
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for (&(cx, cy), &label) in corners.iter().zip(labels) {
        for i in 0..3 {
            for j in 0..3 {
                rows.push(vec![cx + i as f64, cy + j as f64]);
                targets.push(label);
            }
        }
    }
    Data::from_rows(rows, targets).unwrap().shared()
}

/// Half-unit grid of query points over `[lo, hi]²`
pub fn query_grid(lo: f64, hi: f64) -> Vec<Point<f64>> {
    let steps = ((hi - lo) / 0.5).round() as usize;
    (0..=steps)
        .flat_map(|i| {
            (0..=steps).map(move |j| Point::unlabeled(vec![lo + i as f64 * 0.5, lo + j as f64 * 0.5]))
        })
        .collect()
}
