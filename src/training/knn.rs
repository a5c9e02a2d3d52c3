//! K-Nearest Neighbors implementation
//!
//! KNN classifier and regressor over a shared dataset handle. Fitting only
//! validates and keeps the handle; all work happens at prediction time.

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

use super::models::{log_fit, Classifier, FitReport, Learner, Regressor};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// Offset keeping inverse-distance weights finite for exact matches
const DISTANCE_WEIGHT_EPS: f64 = 1e-10;

/// Additive smoothing of neighbor class frequencies
const PROBABILITY_SMOOTHING: f64 = 1e-4;

/// Mass added to every component before normalising a point into a
/// distribution, so zero components keep the logarithms finite
const DISTRIBUTION_EPS: f64 = 1e-10;

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Euclidean distance (L2)
    #[default]
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
    /// Minkowski distance with parameter p ≥ 1
    Minkowski(f64),
    /// One minus cosine similarity; a zero vector is at distance 1 from everything
    Cosine,
    /// Sum of `ln(1 + |x - y|)`
    Lorentzian,
    /// `-ln` of the Bhattacharyya coefficient of the two points read as distributions
    Bhattacharyya,
    /// One minus the Pearson correlation; a constant vector is at distance 1
    Pearson,
    /// Kullback-Leibler divergence of the training point from the query,
    /// both read as distributions
    KullbackLeibler,
    /// Hassanat distance, bounded by 1 per component and invariant to scale
    Hassanat,
    /// Distance in the feature space of a kernel
    Kernel(Kernel),
}

/// Normalise absolute component values into a probability distribution
fn as_distribution(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut p: Vec<f64> = values.map(|v| v.abs() + DISTRIBUTION_EPS).collect();
    let total: f64 = p.iter().sum();
    p.iter_mut().for_each(|v| *v /= total);
    p
}

fn pearson_distance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 1.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a > 0.0 && var_b > 0.0 {
        1.0 - cov / (var_a.sqrt() * var_b.sqrt())
    } else {
        1.0
    }
}

fn hassanat_term(x: f64, y: f64) -> f64 {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    if lo >= 0.0 {
        1.0 - (1.0 + lo) / (1.0 + hi)
    } else {
        // both shifted by |lo|
        1.0 - 1.0 / (1.0 + hi - lo)
    }
}

impl Distance {
    pub fn validate(&self) -> Result<()> {
        match self {
            Distance::Minkowski(p) if *p < 1.0 || !p.is_finite() => Err(
                MltkError::invalid_config("minkowski_p", p, "must be finite and at least 1"),
            ),
            Distance::Kernel(kernel) => kernel.validate(),
            _ => Ok(()),
        }
    }

    /// Distance between two points of equal dimension
    pub fn between<T: Feature>(&self, a: &Point<T>, b: &Point<T>) -> Result<f64> {
        b.check_dim(a.dim())?;
        let pairs = || a.values().zip(b.values());
        let d = match *self {
            Distance::Euclidean => pairs().map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt(),
            Distance::Manhattan => pairs().map(|(x, y)| (x - y).abs()).sum(),
            Distance::Minkowski(p) => pairs()
                .map(|(x, y)| (x - y).abs().powf(p))
                .sum::<f64>()
                .powf(1.0 / p),
            Distance::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
                for (x, y) in pairs() {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                let denom = norm_a.sqrt() * norm_b.sqrt();
                if denom > 0.0 {
                    1.0 - dot / denom
                } else {
                    1.0
                }
            }
            Distance::Lorentzian => pairs().map(|(x, y)| (x - y).abs().ln_1p()).sum(),
            Distance::Bhattacharyya => {
                let p = as_distribution(a.values());
                let q = as_distribution(b.values());
                let coefficient: f64 = p.iter().zip(&q).map(|(x, y)| (x * y).sqrt()).sum();
                (-coefficient.ln()).max(0.0)
            }
            Distance::Pearson => {
                let a: Vec<f64> = a.values().collect();
                let b: Vec<f64> = b.values().collect();
                pearson_distance(&a, &b)
            }
            Distance::KullbackLeibler => {
                let p = as_distribution(a.values());
                let q = as_distribution(b.values());
                p.iter().zip(&q).map(|(x, y)| x * (x / y).ln()).sum::<f64>().max(0.0)
            }
            Distance::Hassanat => pairs().map(|(x, y)| hassanat_term(x, y)).sum(),
            Distance::Kernel(kernel) => return kernel.distance(a, b),
        };
        Ok(d)
    }
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Closer neighbors have more weight (inverse distance)
    Distance,
}

impl WeightScheme {
    fn weight(&self, distance: f64) -> f64 {
        match self {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance => 1.0 / (distance + DISTANCE_WEIGHT_EPS),
        }
    }
}

/// KNN configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnConfig {
    /// Number of neighbors; must not exceed the training set size
    pub k: usize,
    pub distance: Distance,
    pub weights: WeightScheme,
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            k: 5,
            distance: Distance::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

impl KnnConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    pub fn with_weights(mut self, weights: WeightScheme) -> Self {
        self.weights = weights;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(MltkError::invalid_config("k", self.k, "must be at least 1"));
        }
        self.distance.validate()
    }

    fn check_k(&self, n_samples: usize) -> Result<()> {
        if self.k > n_samples {
            return Err(MltkError::invalid_config(
                "k",
                self.k,
                format!("exceeds the number of training points ({})", n_samples),
            ));
        }
        Ok(())
    }
}

/// One neighbor of a query point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the training data
    pub index: usize,
    pub distance: f64,
    /// Label or target of the training point
    pub target: f64,
}

/// Max-heap entry for partial sort (keeps k smallest distances).
/// Equal distances order by index so the lower index survives.
struct HeapEntry(Neighbor);

impl HeapEntry {
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance
            .total_cmp(&other.0.distance)
            .then(self.0.index.cmp(&other.0.index))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

/// Training data and targets shared by both KNN learners
#[derive(Debug, Clone)]
struct NeighborIndex<T> {
    data: Arc<Data<T>>,
    targets: Array1<f64>,
}

impl<T: Feature> NeighborIndex<T> {
    /// k nearest training points, nearest first. O(n log k) with a bounded max-heap.
    fn nearest(&self, point: &Point<T>, k: usize, distance: &Distance) -> Result<Vec<Neighbor>> {
        point.check_dim(self.data.dim())?;
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (index, train) in self.data.iter().enumerate() {
            let entry = HeapEntry(Neighbor {
                index,
                distance: distance.between(train, point)?,
                target: self.targets[index],
            });
            if heap.len() < k {
                heap.push(entry);
            } else if let Some(top) = heap.peek() {
                if entry < *top {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }
        Ok(heap.into_sorted_vec().into_iter().map(|e| e.0).collect())
    }
}

/// Weighted majority vote; a tie goes to the class of the nearest tied neighbor
fn vote(neighbors: &[Neighbor], weights: WeightScheme) -> f64 {
    // (class, accumulated weight), in order of first appearance
    let mut tally: Vec<(f64, f64)> = Vec::new();
    for n in neighbors {
        let w = weights.weight(n.distance);
        match tally.iter_mut().find(|(class, _)| *class == n.target) {
            Some(entry) => entry.1 += w,
            None => tally.push((n.target, w)),
        }
    }
    let mut best: Option<(f64, f64)> = None;
    for (class, w) in tally {
        match best {
            Some((_, best_w)) if w <= best_w => {}
            _ => best = Some((class, w)),
        }
    }
    best.map(|(class, _)| class).unwrap_or(0.0)
}

fn weighted_mean(neighbors: &[Neighbor], weights: WeightScheme) -> f64 {
    let (sum, total) = neighbors.iter().fold((0.0, 0.0), |(s, t), n| {
        let w = weights.weight(n.distance);
        (s + w * n.target, t + w)
    });
    if total > 0.0 {
        sum / total
    } else {
        neighbors.iter().map(|n| n.target).sum::<f64>() / neighbors.len().max(1) as f64
    }
}

fn fit_index<T: Feature>(
    algorithm: &'static str,
    config: &KnnConfig,
    data: &Arc<Data<T>>,
    targets: Array1<f64>,
) -> (NeighborIndex<T>, FitReport) {
    debug!(
        algorithm,
        n_samples = data.len(),
        dim = data.dim(),
        k = config.k,
        "Fitting"
    );
    let index = NeighborIndex {
        data: Arc::clone(data),
        targets,
    };
    let report = FitReport::converged(1, 0);
    log_fit(algorithm, &report);
    (index, report)
}

/// K-Nearest Neighbors Classifier
#[derive(Debug, Clone)]
pub struct KnnClassifier<T = f64> {
    config: KnnConfig,
    index: Option<NeighborIndex<T>>,
    classes: Vec<i64>,
}

impl<T: Feature> KnnClassifier<T> {
    pub fn new(config: KnnConfig) -> Self {
        Self {
            config,
            index: None,
            classes: Vec::new(),
        }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KnnConfig::default().with_k(k))
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    /// Sorted distinct classes seen during fit
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn training_data(&self) -> Option<&Arc<Data<T>>> {
        self.index.as_ref().map(|i| &i.data)
    }

    /// The k nearest training points of `point`, nearest first
    pub fn neighbors(&self, point: &Point<T>) -> Result<Vec<Neighbor>> {
        self.index
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .nearest(point, self.config.k, &self.config.distance)
    }

    /// Smoothed class probabilities among the k neighbors, aligned with
    /// [`classes`](Self::classes).
    ///
    /// A class holding vote weight `w` out of a total `W` gets
    /// `(w + s) / (W + n_classes * s)` with `s = 1e-4`, so every class keeps
    /// a little mass and the probabilities sum to one.
    pub fn predict_proba(&self, point: &Point<T>) -> Result<Vec<f64>> {
        let neighbors = self.neighbors(point)?;
        Ok(self.class_probabilities(&neighbors))
    }

    /// Predicted class together with its smoothed probability
    pub fn prediction_probability(&self, point: &Point<T>) -> Result<(f64, f64)> {
        let neighbors = self.neighbors(point)?;
        let class = vote(&neighbors, self.config.weights);
        let probability = self
            .classes
            .binary_search(&(class.round() as i64))
            .map(|i| self.class_probabilities(&neighbors)[i])
            .unwrap_or(0.0);
        Ok((class, probability))
    }

    fn class_probabilities(&self, neighbors: &[Neighbor]) -> Vec<f64> {
        let mut mass = vec![0.0; self.classes.len()];
        let mut total = 0.0;
        for n in neighbors {
            let w = self.config.weights.weight(n.distance);
            if let Ok(i) = self.classes.binary_search(&(n.target.round() as i64)) {
                mass[i] += w;
            }
            total += w;
        }
        let denom = total + self.classes.len() as f64 * PROBABILITY_SMOOTHING;
        mass.iter().map(|m| (m + PROBABILITY_SMOOTHING) / denom).collect()
    }

    pub fn is_fitted(&self) -> bool {
        self.index.is_some()
    }
}

impl<T: Feature> Default for KnnClassifier<T> {
    fn default() -> Self {
        Self::new(KnnConfig::default())
    }
}

impl<T: Feature> Learner<T> for KnnClassifier<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.index = None;
        self.classes.clear();
        self.config.validate()?;
        data.ensure_non_empty()?;
        self.config.check_k(data.len())?;
        let classes = data.classes()?;
        let (index, report) = fit_index("knn_classifier", &self.config, data, data.targets()?);
        self.classes = classes;
        self.index = Some(index);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let neighbors = self.neighbors(point)?;
        Ok(vote(&neighbors, self.config.weights))
    }

    fn is_fitted(&self) -> bool {
        self.index.is_some()
    }

    fn name(&self) -> &'static str {
        "knn_classifier"
    }

    /// Predict class labels (parallelized over query points)
    fn predict_batch(&self, data: &Data<T>) -> Result<Array1<f64>> {
        let predictions = data
            .points()
            .par_iter()
            .map(|p| Learner::predict(self, p))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from_vec(predictions))
    }
}

impl<T: Feature> Classifier<T> for KnnClassifier<T> {
    /// Weighted mean label of the neighbors; for ±1 labels its sign is the vote
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        let neighbors = self.neighbors(point)?;
        Ok(weighted_mean(&neighbors, self.config.weights))
    }
}

/// K-Nearest Neighbors Regressor
#[derive(Debug, Clone)]
pub struct KnnRegressor<T = f64> {
    config: KnnConfig,
    index: Option<NeighborIndex<T>>,
}

impl<T: Feature> KnnRegressor<T> {
    pub fn new(config: KnnConfig) -> Self {
        Self {
            config,
            index: None,
        }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KnnConfig::default().with_k(k))
    }

    pub fn config(&self) -> &KnnConfig {
        &self.config
    }

    pub fn neighbors(&self, point: &Point<T>) -> Result<Vec<Neighbor>> {
        self.index
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .nearest(point, self.config.k, &self.config.distance)
    }

    pub fn is_fitted(&self) -> bool {
        self.index.is_some()
    }
}

impl<T: Feature> Default for KnnRegressor<T> {
    fn default() -> Self {
        Self::new(KnnConfig::default())
    }
}

impl<T: Feature> Learner<T> for KnnRegressor<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.index = None;
        self.config.validate()?;
        data.ensure_non_empty()?;
        self.config.check_k(data.len())?;
        let (index, report) = fit_index("knn_regressor", &self.config, data, data.targets()?);
        self.index = Some(index);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let neighbors = self.neighbors(point)?;
        Ok(weighted_mean(&neighbors, self.config.weights))
    }

    fn is_fitted(&self) -> bool {
        self.index.is_some()
    }

    fn name(&self) -> &'static str {
        "knn_regressor"
    }

    fn predict_batch(&self, data: &Data<T>) -> Result<Array1<f64>> {
        let predictions = data
            .points()
            .par_iter()
            .map(|p| Learner::predict(self, p))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from_vec(predictions))
    }
}

impl<T: Feature> Regressor<T> for KnnRegressor<T> {}
