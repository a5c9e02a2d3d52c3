//! Cross-validation splitting and fold evaluation

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{FitStatus, Learner};
use crate::dataset::{Data, Feature};
use crate::error::{MltkError, Result};

/// Cross-validation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CVStrategy {
    /// K-Fold cross-validation
    KFold { n_splits: usize, shuffle: bool },
    /// Stratified K-Fold (maintains class distribution)
    StratifiedKFold { n_splits: usize, shuffle: bool },
    /// One fold per point
    LeaveOneOut,
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::KFold {
            n_splits: 5,
            shuffle: true,
        }
    }
}

/// A single train/test split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: Option<u64>,
}

impl CrossValidator {
    /// Create a new cross-validator
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn strategy(&self) -> CVStrategy {
        self.strategy
    }

    /// Generate train/test index splits over `data`.
    ///
    /// Stratified splitting needs integral labels on every point.
    pub fn split<T: Feature>(&self, data: &Data<T>) -> Result<Vec<CVSplit>> {
        let n_samples = data.len();
        match self.strategy {
            CVStrategy::KFold { n_splits, shuffle } => {
                self.k_fold_split(n_samples, n_splits, shuffle)
            }
            CVStrategy::StratifiedKFold { n_splits, shuffle } => {
                data.classes()?;
                let y = data.targets()?;
                self.stratified_k_fold_split(&y, n_splits, shuffle)
            }
            CVStrategy::LeaveOneOut => {
                check_splits(n_samples, 2)?;
                Ok(leave_one_out_split(n_samples))
            }
        }
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn k_fold_split(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        check_splits(n_samples, n_splits)?;

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indices.shuffle(&mut self.rng());
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;

        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices: Vec<usize> = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }

    fn stratified_k_fold_split(
        &self,
        y: &Array1<f64>,
        n_splits: usize,
        shuffle: bool,
    ) -> Result<Vec<CVSplit>> {
        check_splits(y.len(), n_splits)?;

        let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, &val) in y.iter().enumerate() {
            class_indices.entry(val.round() as i64).or_default().push(idx);
        }

        if shuffle {
            let mut rng = self.rng();
            for indices in class_indices.values_mut() {
                indices.shuffle(&mut rng);
            }
        }

        // Deal classes round-robin, continuing where the previous class
        // stopped, so fold sizes differ by at most one
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut position = 0;
        for indices in class_indices.values() {
            for &idx in indices {
                folds[position % n_splits].push(idx);
                position += 1;
            }
        }

        let splits = (0..n_splits)
            .map(|fold_idx| CVSplit {
                train_indices: folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect(),
                test_indices: folds[fold_idx].clone(),
                fold_idx,
            })
            .collect();

        Ok(splits)
    }
}

fn check_splits(n_samples: usize, n_splits: usize) -> Result<()> {
    if n_splits < 2 {
        return Err(MltkError::invalid_config(
            "n_splits",
            n_splits,
            "must be at least 2",
        ));
    }
    if n_samples < n_splits {
        return Err(MltkError::invalid_config(
            "n_splits",
            n_splits,
            format!("cannot exceed the number of samples ({})", n_samples),
        ));
    }
    Ok(())
}

fn leave_one_out_split(n_samples: usize) -> Vec<CVSplit> {
    (0..n_samples)
        .map(|i| CVSplit {
            train_indices: (0..n_samples).filter(|&j| j != i).collect(),
            test_indices: vec![i],
            fold_idx: i,
        })
        .collect()
}

/// How a fold's predictions are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    /// Fraction of exactly matching labels (higher is better)
    #[default]
    Accuracy,
    /// Mean squared error of predicted targets (lower is better)
    MeanSquaredError,
}

impl Scoring {
    pub fn score(&self, y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
        if y_true.len() != y_pred.len() {
            return Err(MltkError::DimensionMismatch {
                expected: y_true.len(),
                actual: y_pred.len(),
            });
        }
        if y_true.is_empty() {
            return Err(MltkError::EmptyData);
        }
        let n = y_true.len() as f64;
        let score = match self {
            Scoring::Accuracy => {
                let correct = y_true
                    .iter()
                    .zip(y_pred.iter())
                    .filter(|(t, p)| (*t - *p).abs() < 1e-9)
                    .count();
                correct as f64 / n
            }
            Scoring::MeanSquaredError => {
                y_true
                    .iter()
                    .zip(y_pred.iter())
                    .map(|(t, p)| (t - p).powi(2))
                    .sum::<f64>()
                    / n
            }
        };
        Ok(score)
    }
}

/// Cross-validation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub n_folds: usize,
    /// How each fold's fit terminated
    pub statuses: Vec<FitStatus>,
}

impl CVResults {
    pub fn from_folds(folds: Vec<(f64, FitStatus)>) -> Self {
        let (scores, statuses): (Vec<f64>, Vec<FitStatus>) = folds.into_iter().unzip();
        let n = scores.len();
        let mean_score = if n > 0 {
            scores.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let std_score = if n > 0 {
            (scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n as f64).sqrt()
        } else {
            0.0
        };

        Self {
            scores,
            mean_score,
            std_score,
            n_folds: n,
            statuses,
        }
    }

    /// Number of folds whose fit met its stopping criterion
    pub fn n_converged(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == FitStatus::Converged)
            .count()
    }
}

/// Fit a fresh clone of `prototype` on every fold's training subset and
/// score it on the fold's test subset.
///
/// Folds run in parallel. A fold whose fit exhausted its budget is still
/// scored; its status is recorded in [`CVResults::statuses`].
pub fn cross_validate<T, L>(
    prototype: &L,
    data: &Arc<Data<T>>,
    splits: &[CVSplit],
    scoring: Scoring,
) -> Result<CVResults>
where
    T: Feature,
    L: Learner<T> + Clone,
{
    if splits.is_empty() {
        return Err(MltkError::invalid_config(
            "splits",
            0,
            "at least one fold is required",
        ));
    }

    let folds = splits
        .par_iter()
        .map(|split| evaluate_fold(prototype, data, split, scoring))
        .collect::<Result<Vec<_>>>()?;

    let results = CVResults::from_folds(folds);
    info!(
        algorithm = prototype.name(),
        folds = results.n_folds,
        mean = results.mean_score,
        std = results.std_score,
        converged = results.n_converged(),
        "Cross-validation complete"
    );
    Ok(results)
}

fn evaluate_fold<T, L>(
    prototype: &L,
    data: &Data<T>,
    split: &CVSplit,
    scoring: Scoring,
) -> Result<(f64, FitStatus)>
where
    T: Feature,
    L: Learner<T> + Clone,
{
    let train = data.select(&split.train_indices)?.shared();
    let test = data.select(&split.test_indices)?;

    let mut model = prototype.clone();
    let report = model.fit(&train)?;
    let y_pred = model.predict_batch(&test)?;
    let score = scoring.score(&test.targets()?, &y_pred)?;

    debug!(
        fold = split.fold_idx,
        train = split.train_indices.len(),
        test = split.test_indices.len(),
        score,
        "Fold evaluated"
    );
    Ok((score, report.status))
}
