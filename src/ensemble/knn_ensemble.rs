//! Ensembles of KNN classifiers that differ in their distance metric
//!
//! Both ensembles build one member per metric and fit the members in
//! parallel. The random subspace ensemble trains each member on a random
//! subset of features and a resample of the points and takes a plain
//! majority vote. The bagging ensemble trains every member on the full data
//! and weighs its vote by the member's cross-validated accuracy.

use rand::seq::index;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::training::cross_validation::{cross_validate, CVStrategy, CrossValidator, Scoring};
use crate::training::knn::{Distance, KnnClassifier, KnnConfig};
use crate::training::models::{log_fit, FitReport, Learner};

/// One member per metric unless configured otherwise
pub const DEFAULT_METRICS: [Distance; 7] = [
    Distance::Euclidean,
    Distance::Lorentzian,
    Distance::Cosine,
    Distance::Bhattacharyya,
    Distance::Pearson,
    Distance::KullbackLeibler,
    Distance::Hassanat,
];

fn default_metrics() -> Vec<Distance> {
    DEFAULT_METRICS.to_vec()
}

/// How member predictions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// One vote per member
    Hard,
    /// Member weight times the probability of the class it predicts
    #[default]
    Soft,
}

fn validate_members(k: usize, metrics: &[Distance]) -> Result<()> {
    if k == 0 {
        return Err(MltkError::invalid_config("k", k, "must be at least 1"));
    }
    if metrics.is_empty() {
        return Err(MltkError::invalid_config(
            "metrics",
            0,
            "at least one member metric is required",
        ));
    }
    metrics.iter().try_for_each(Distance::validate)
}

fn check_weights(weights: &[f64], n_members: usize) -> Result<()> {
    if weights.len() != n_members {
        return Err(MltkError::invalid_config(
            "weights",
            weights.len(),
            format!("expected one weight per member ({})", n_members),
        ));
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(MltkError::invalid_config(
            "weights",
            format!("{:?}", weights),
            "weights must be finite and non-negative",
        ));
    }
    Ok(())
}

fn check_k<T: Feature>(k: usize, data: &Data<T>) -> Result<()> {
    if k > data.len() {
        return Err(MltkError::invalid_config(
            "k",
            k,
            format!("exceeds the number of training points ({})", data.len()),
        ));
    }
    Ok(())
}

fn member_knn<T: Feature>(k: usize, metric: Distance) -> KnnClassifier<T> {
    KnnClassifier::new(KnnConfig::default().with_k(k).with_distance(metric))
}

#[inline]
fn class_index(classes: &[i64], label: f64) -> Option<usize> {
    classes.binary_search(&(label.round() as i64)).ok()
}

/// Position of the largest vote; ties go to the lowest class
fn winner<V: PartialOrd + Copy>(votes: &[V]) -> usize {
    let mut best = 0;
    for (i, &v) in votes.iter().enumerate().skip(1) {
        if v > votes[best] {
            best = i;
        }
    }
    best
}

fn merge_reports(reports: impl IntoIterator<Item = FitReport>) -> FitReport {
    reports
        .into_iter()
        .reduce(FitReport::merge)
        .unwrap_or_else(|| FitReport::converged(0, 0))
}

// ============ Random subspace ============

/// Random subspace ensemble configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnSubspaceConfig {
    /// Neighbors per member
    pub k: usize,
    /// One member per metric
    pub metrics: Vec<Distance>,
    /// Fraction of the features each member sees, rounded up
    pub feature_ratio: f64,
    /// Member `i` is seeded with `random_state + i`
    pub random_state: Option<u64>,
}

impl Default for KnnSubspaceConfig {
    fn default() -> Self {
        Self {
            k: 5,
            metrics: default_metrics(),
            feature_ratio: 0.5,
            random_state: Some(42),
        }
    }
}

impl KnnSubspaceConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Distance>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_feature_ratio(mut self, ratio: f64) -> Self {
        self.feature_ratio = ratio;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_members(self.k, &self.metrics)?;
        if !(self.feature_ratio > 0.0 && self.feature_ratio <= 1.0) {
            return Err(MltkError::invalid_config(
                "feature_ratio",
                self.feature_ratio,
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SubspaceMember<T> {
    /// Sorted feature indices the member was trained on
    features: Vec<usize>,
    knn: KnnClassifier<T>,
}

/// Majority vote of KNN classifiers, each trained on a random feature
/// subspace and a with-replacement sample of `n / n_members` points
/// (at least `k`).
#[derive(Debug, Clone)]
pub struct KnnSubspaceEnsemble<T = f64> {
    config: KnnSubspaceConfig,
    members: Vec<SubspaceMember<T>>,
    classes: Vec<i64>,
    input_dim: usize,
}

impl<T: Feature> KnnSubspaceEnsemble<T> {
    pub fn new(config: KnnSubspaceConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
            classes: Vec::new(),
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &KnnSubspaceConfig {
        &self.config
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    /// Feature indices of every member, in member order
    pub fn subspaces(&self) -> Vec<&[usize]> {
        self.members.iter().map(|m| m.features.as_slice()).collect()
    }

    /// Votes per class, in class order
    pub fn votes(&self, point: &Point<T>) -> Result<Vec<usize>> {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        point.check_dim(self.input_dim)?;
        let mut votes = vec![0usize; self.classes.len()];
        for member in &self.members {
            let label = member.knn.predict(&point.select_features(&member.features)?)?;
            if let Some(i) = class_index(&self.classes, label) {
                votes[i] += 1;
            }
        }
        Ok(votes)
    }
}

impl<T: Feature> Default for KnnSubspaceEnsemble<T> {
    fn default() -> Self {
        Self::new(KnnSubspaceConfig::default())
    }
}

impl<T: Feature> Learner<T> for KnnSubspaceEnsemble<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.members.clear();
        self.classes.clear();
        self.config.validate()?;
        data.ensure_non_empty()?;
        check_k(self.config.k, data)?;
        let classes = data.classes()?;

        let (n, dim) = (data.len(), data.dim());
        if dim == 0 {
            return Err(MltkError::invalid_config(
                "feature_ratio",
                self.config.feature_ratio,
                "the data has no features to draw from",
            ));
        }
        let n_features = ((dim as f64 * self.config.feature_ratio).ceil() as usize).clamp(1, dim);
        let sample_size = (n / self.config.metrics.len()).max(self.config.k);
        debug!(
            algorithm = "knn_subspace_ensemble",
            n_samples = n,
            dim,
            n_members = self.config.metrics.len(),
            n_features,
            sample_size,
            "Fitting"
        );

        let config = &self.config;
        let fitted = config
            .metrics
            .par_iter()
            .enumerate()
            .map(|(i, &metric)| {
                let mut rng = match config.random_state {
                    Some(s) => ChaCha8Rng::seed_from_u64(s.wrapping_add(i as u64)),
                    None => ChaCha8Rng::from_entropy(),
                };
                let mut features = index::sample(&mut rng, dim, n_features).into_vec();
                features.sort_unstable();
                let indices: Vec<usize> = (0..sample_size).map(|_| rng.gen_range(0..n)).collect();
                let sample = data.select(&indices)?.select_features(&features)?.shared();

                let mut knn = member_knn(config.k, metric);
                let report = knn.fit(&sample)?;
                Ok((SubspaceMember { features, knn }, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = merge_reports(fitted.iter().map(|(_, r)| *r));
        self.members = fitted.into_iter().map(|(m, _)| m).collect();
        self.classes = classes;
        self.input_dim = dim;
        log_fit("knn_subspace_ensemble", &report);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let votes = self.votes(point)?;
        Ok(self.classes[winner(&votes)] as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    fn name(&self) -> &'static str {
        "knn_subspace_ensemble"
    }
}

// ============ Weighted bagging ============

/// Weighted KNN ensemble configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnBaggingConfig {
    /// Neighbors per member
    pub k: usize,
    /// One member per metric
    pub metrics: Vec<Distance>,
    pub voting: VotingStrategy,
    /// Stratified folds used to estimate each member's accuracy
    pub n_folds: usize,
    /// Member weights; cross-validated accuracies when absent
    pub weights: Option<Vec<f64>>,
    pub random_state: Option<u64>,
}

impl Default for KnnBaggingConfig {
    fn default() -> Self {
        Self {
            k: 5,
            metrics: default_metrics(),
            voting: VotingStrategy::Soft,
            n_folds: 10,
            weights: None,
            random_state: Some(42),
        }
    }
}

impl KnnBaggingConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Distance>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_voting(mut self, voting: VotingStrategy) -> Self {
        self.voting = voting;
        self
    }

    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_members(self.k, &self.metrics)?;
        if self.n_folds < 2 {
            return Err(MltkError::invalid_config(
                "n_folds",
                self.n_folds,
                "must be at least 2",
            ));
        }
        if let Some(weights) = &self.weights {
            check_weights(weights, self.metrics.len())?;
        }
        Ok(())
    }

    fn splitter(&self) -> CrossValidator {
        let cv = CrossValidator::new(CVStrategy::StratifiedKFold {
            n_splits: self.n_folds,
            shuffle: true,
        });
        match self.random_state {
            Some(seed) => cv.with_random_state(seed),
            None => cv,
        }
    }
}

/// KNN classifiers over the whole training set, one per metric, voting with
/// weights.
///
/// Under soft voting a member adds `weight * p` to the class it predicts,
/// `p` being its smoothed neighbor probability for that class; under hard
/// voting every member adds one. The class with the largest total wins and
/// ties go to the lowest class.
#[derive(Debug, Clone)]
pub struct KnnBaggingEnsemble<T = f64> {
    config: KnnBaggingConfig,
    members: Vec<KnnClassifier<T>>,
    weights: Vec<f64>,
    classes: Vec<i64>,
}

impl<T: Feature> KnnBaggingEnsemble<T> {
    pub fn new(config: KnnBaggingConfig) -> Self {
        Self {
            config,
            members: Vec::new(),
            weights: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn config(&self) -> &KnnBaggingConfig {
        &self.config
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    /// Vote weight of every member, in metric order
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Replace the member weights of a fitted ensemble
    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        check_weights(&weights, self.members.len())?;
        self.weights = weights;
        Ok(())
    }

    /// Accumulated vote per class, in class order
    pub fn votes(&self, point: &Point<T>) -> Result<Vec<f64>> {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        let mut votes = vec![0.0; self.classes.len()];
        for (member, &weight) in self.members.iter().zip(&self.weights) {
            let (label, probability) = member.prediction_probability(point)?;
            let vote = match self.config.voting {
                VotingStrategy::Soft => weight * probability,
                VotingStrategy::Hard => 1.0,
            };
            if let Some(i) = class_index(&self.classes, label) {
                votes[i] += vote;
            }
        }
        Ok(votes)
    }

    /// Fraction of `data` that at least one member labels correctly
    pub fn oracle_accuracy(&self, data: &Data<T>) -> Result<f64> {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        data.ensure_non_empty()?;
        let targets = data.targets()?.to_vec();
        let hits = data
            .points()
            .par_iter()
            .zip(targets.par_iter())
            .map(|(p, &y)| {
                for member in &self.members {
                    if (member.predict(p)? - y).abs() < 1e-9 {
                        return Ok(1usize);
                    }
                }
                Ok(0)
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(hits.iter().sum::<usize>() as f64 / data.len() as f64)
    }
}

impl<T: Feature> Default for KnnBaggingEnsemble<T> {
    fn default() -> Self {
        Self::new(KnnBaggingConfig::default())
    }
}

impl<T: Feature> Learner<T> for KnnBaggingEnsemble<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.members.clear();
        self.weights.clear();
        self.classes.clear();
        self.config.validate()?;
        data.ensure_non_empty()?;
        check_k(self.config.k, data)?;
        let classes = data.classes()?;
        debug!(
            algorithm = "knn_bagging_ensemble",
            n_samples = data.len(),
            dim = data.dim(),
            n_members = self.config.metrics.len(),
            voting = ?self.config.voting,
            "Fitting"
        );

        let config = &self.config;
        let splits = match config.weights {
            Some(_) => None,
            None => Some(config.splitter().split(&**data)?),
        };
        let fitted = config
            .metrics
            .par_iter()
            .map(|&metric| {
                let mut knn = member_knn(config.k, metric);
                let accuracy = match &splits {
                    Some(splits) => cross_validate(&knn, data, splits, Scoring::Accuracy)?.mean_score,
                    None => 0.0,
                };
                let report = knn.fit(data)?;
                Ok((knn, accuracy, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = merge_reports(fitted.iter().map(|(_, _, r)| *r));
        let accuracies: Vec<f64> = fitted.iter().map(|(_, a, _)| *a).collect();
        self.weights = config.weights.clone().unwrap_or(accuracies);
        self.members = fitted.into_iter().map(|(m, _, _)| m).collect();
        self.classes = classes;
        debug!(weights = ?self.weights, "Member weights");
        log_fit("knn_bagging_ensemble", &report);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let votes = self.votes(point)?;
        Ok(self.classes[winner(&votes)] as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    fn name(&self) -> &'static str {
        "knn_bagging_ensemble"
    }
}
