use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mltk::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Two Gaussian-ish blobs around ±2 on every axis
fn create_classification_data(n_rows: usize, n_features: usize) -> Arc<Data<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut rows = Vec::with_capacity(n_rows);
    let mut labels = Vec::with_capacity(n_rows);
    for i in 0..n_rows {
        let label = if i % 2 == 0 { 1.0 } else { -1.0 };
        let row: Vec<f64> = (0..n_features)
            .map(|_| 2.0 * label + rng.gen::<f64>() * 2.0 - 1.0)
            .collect();
        rows.push(row);
        labels.push(label);
    }
    Data::from_rows(rows, labels).unwrap().shared()
}

fn bench_classifiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifiers");
    group.sample_size(10);

    for n_rows in [200, 1000].iter() {
        let data = create_classification_data(*n_rows, 10);
        let configs = [
            ClassifierConfig::PerceptronPrimal(PerceptronConfig::default()),
            ClassifierConfig::PerceptronDual(PerceptronConfig::default()),
            ClassifierConfig::ImaPrimal(ImaConfig::default()),
            ClassifierConfig::Smo(SmoConfig::default().with_kernel(Kernel::Rbf { gamma: 0.1 })),
        ];

        for config in configs {
            group.bench_with_input(
                BenchmarkId::new(config.algorithm(), n_rows),
                &data,
                |b, data| {
                    b.iter(|| {
                        let mut clf: AnyClassifier = config.build();
                        clf.fit(black_box(data)).unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    let train = create_classification_data(1000, 10);
    let test = create_classification_data(2000, 10);

    let mut smo: AnyClassifier = ClassifierConfig::Smo(SmoConfig::default()).build();
    smo.fit(&train).unwrap();
    group.bench_function("smo_batch", |b| {
        b.iter(|| smo.predict_batch(black_box(&test)).unwrap())
    });

    let mut knn = KnnClassifier::with_k(5);
    knn.fit(&train).unwrap();
    group.bench_function("knn_batch", |b| {
        b.iter(|| knn.predict_batch(black_box(&test)).unwrap())
    });

    group.finish();
}

fn bench_kmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("kmeans");
    group.sample_size(10);

    for n_rows in [1000, 5000].iter() {
        let data = create_classification_data(*n_rows, 10);
        group.bench_with_input(BenchmarkId::new("fit", n_rows), &data, |b, data| {
            b.iter(|| {
                let mut model = KMeans::new(KMeansConfig::default().with_k(8));
                model.fit(black_box(data)).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_cross_validation(c: &mut Criterion) {
    let data = create_classification_data(1000, 10);
    let splits = CrossValidator::new(CVStrategy::KFold {
        n_splits: 5,
        shuffle: true,
    })
    .with_random_state(42)
    .split(&*data)
    .unwrap();
    let prototype: AnyClassifier = ClassifierConfig::default().build();

    c.bench_function("cross_validate_perceptron", |b| {
        b.iter(|| cross_validate(&prototype, black_box(&data), &splits, Scoring::Accuracy).unwrap())
    });
}

criterion_group!(
    benches,
    bench_classifiers,
    bench_prediction,
    bench_kmeans,
    bench_cross_validation
);
criterion_main!(benches);
