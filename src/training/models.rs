//! Learner traits and fitted model state

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};

/// Coefficients at or below this magnitude do not mark a support example
pub const SUPPORT_EPS: f64 = 1e-8;

/// How a fit terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The algorithm's own stopping criterion was met
    Converged,
    /// The iteration/epoch budget ran out first; the model is still usable
    BudgetExhausted,
}

/// Outcome of a successful `fit` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitReport {
    pub status: FitStatus,
    /// Passes, epochs or stages run, depending on the algorithm
    pub iterations: usize,
    /// Number of model updates performed
    pub updates: usize,
}

impl FitReport {
    pub fn converged(iterations: usize, updates: usize) -> Self {
        Self {
            status: FitStatus::Converged,
            iterations,
            updates,
        }
    }

    pub fn exhausted(iterations: usize, updates: usize) -> Self {
        Self {
            status: FitStatus::BudgetExhausted,
            iterations,
            updates,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status == FitStatus::Converged
    }

    /// Turn a budget-exhausted report into `ConvergenceNotReached`
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            FitStatus::Converged => Ok(self),
            FitStatus::BudgetExhausted => Err(MltkError::ConvergenceNotReached {
                iterations: self.iterations,
            }),
        }
    }

    /// Combine the reports of independently fitted members.
    ///
    /// The result is converged only if both are; iterations take the
    /// maximum and updates add up.
    pub fn merge(self, other: Self) -> Self {
        let status = if self.is_converged() && other.is_converged() {
            FitStatus::Converged
        } else {
            FitStatus::BudgetExhausted
        };
        Self {
            status,
            iterations: self.iterations.max(other.iterations),
            updates: self.updates + other.updates,
        }
    }
}

/// Common contract of every learner.
///
/// `fit` fully overwrites any previous model state. `predict` fails with
/// [`MltkError::NotFitted`] before the first successful fit.
pub trait Learner<T: Feature>: Send + Sync {
    /// Fit the learner on a shared dataset
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport>;

    /// Predict a label, target or cluster index for one point
    fn predict(&self, point: &Point<T>) -> Result<f64>;

    fn is_fitted(&self) -> bool;

    /// Short algorithm name used in logs
    fn name(&self) -> &'static str;

    /// Predict every point of a dataset
    fn predict_batch(&self, data: &Data<T>) -> Result<Array1<f64>> {
        data.iter()
            .map(|p| self.predict(p))
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }
}

/// A learner producing class decisions
pub trait Classifier<T: Feature>: Learner<T> {
    /// Signed confidence for one point; binary learners predict `+1` when
    /// it is non-negative and `-1` otherwise
    fn decision_function(&self, point: &Point<T>) -> Result<f64>;
}

/// A learner producing real-valued targets
pub trait Regressor<T: Feature>: Learner<T> {}

/// An unsupervised learner grouping points around centroids
pub trait Clusterer<T: Feature>: Learner<T> {
    /// Fitted centroids, one row per cluster
    fn centroids(&self) -> Option<&ndarray::Array2<f64>>;

    /// Cluster index of every training point
    fn assignments(&self) -> Option<&[usize]>;
}

/// Fitted state of a primal learner: an explicit weight vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimalModel {
    pub weights: Array1<f64>,
    pub bias: f64,
    /// Norm of `weights` under the learner's margin norm
    pub norm: f64,
}

impl PrimalModel {
    pub fn zeros(dim: usize) -> Self {
        Self {
            weights: Array1::zeros(dim),
            bias: 0.0,
            norm: 0.0,
        }
    }

    /// `w·x + b` for an already mapped feature vector
    pub fn decision(&self, x: &Array1<f64>) -> Result<f64> {
        if x.len() != self.weights.len() {
            return Err(MltkError::DimensionMismatch {
                expected: self.weights.len(),
                actual: x.len(),
            });
        }
        Ok(self.weights.dot(x) + self.bias)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Fitted state of a dual learner: one coefficient per training example.
///
/// Coefficients index into the dataset the model was fit on; the learner
/// keeps the `Arc` handle, the model itself does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualModel {
    pub alphas: Array1<f64>,
    pub bias: f64,
    /// Norm of the implied weight vector in kernel feature space
    pub norm: f64,
}

impl DualModel {
    pub fn zeros(n: usize) -> Self {
        Self {
            alphas: Array1::zeros(n),
            bias: 0.0,
            norm: 0.0,
        }
    }

    /// Indices of examples with a nonzero coefficient
    pub fn support_indices(&self) -> Vec<usize> {
        self.alphas
            .iter()
            .enumerate()
            .filter(|(_, a)| a.abs() > SUPPORT_EPS)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Log the outcome of a fit
pub(crate) fn log_fit(algorithm: &str, report: &FitReport) {
    match report.status {
        FitStatus::Converged => info!(
            algorithm,
            iterations = report.iterations,
            updates = report.updates,
            "Fit converged"
        ),
        FitStatus::BudgetExhausted => warn!(
            algorithm,
            iterations = report.iterations,
            updates = report.updates,
            "Iteration budget exhausted before convergence"
        ),
    }
}

/// Binary decision from a signed margin
#[inline]
pub(crate) fn sign(f: f64) -> f64 {
    if f >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Extract labels for a binary learner: every label must be −1 or +1 and
/// both classes must be present
pub(crate) fn binary_labels<T: Feature>(data: &Data<T>) -> Result<Array1<f64>> {
    let y = data.targets()?;
    let mut has_pos = false;
    let mut has_neg = false;
    for (i, &v) in y.iter().enumerate() {
        if v == 1.0 {
            has_pos = true;
        } else if v == -1.0 {
            has_neg = true;
        } else {
            return Err(MltkError::InvalidLabels(format!(
                "binary learners require labels -1 or +1, but point {} has label {}",
                i, v
            )));
        }
    }
    if !(has_pos && has_neg) {
        return Err(MltkError::InvalidLabels(
            "binary learners require both classes -1 and +1".to_string(),
        ));
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_report_merge() {
        let a = FitReport::converged(3, 10);
        let b = FitReport::exhausted(7, 5);
        let merged = a.merge(b);
        assert_eq!(merged.status, FitStatus::BudgetExhausted);
        assert_eq!(merged.iterations, 7);
        assert_eq!(merged.updates, 15);
        assert!(a.merge(a).is_converged());
    }

    #[test]
    fn test_fit_report_into_result() {
        assert!(FitReport::converged(1, 1).into_result().is_ok());
        assert!(matches!(
            FitReport::exhausted(50, 9).into_result(),
            Err(MltkError::ConvergenceNotReached { iterations: 50 })
        ));
    }

    #[test]
    fn test_primal_model_json() {
        let model = PrimalModel {
            weights: array![1.0, -2.0],
            bias: 0.5,
            norm: 5.0f64.sqrt(),
        };
        let restored = PrimalModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.decision(&array![2.0, 1.0]).unwrap(), 0.5);
        assert!(restored.decision(&array![1.0]).is_err());
    }

    #[test]
    fn test_dual_model_support_indices() {
        let model = DualModel {
            alphas: array![0.0, 2.0, 1e-12, 0.5],
            bias: 0.0,
            norm: 1.0,
        };
        assert_eq!(model.support_indices(), vec![1, 3]);
    }

    #[test]
    fn test_binary_labels() {
        let ok = Data::from_rows(vec![vec![0.0], vec![1.0]], vec![-1.0, 1.0]).unwrap();
        assert_eq!(binary_labels(&ok).unwrap(), array![-1.0, 1.0]);

        let one_class = Data::from_rows(vec![vec![0.0], vec![1.0]], vec![1.0, 1.0]).unwrap();
        assert!(matches!(
            binary_labels(&one_class),
            Err(MltkError::InvalidLabels(_))
        ));

        let wrong = Data::from_rows(vec![vec![0.0], vec![1.0]], vec![0.0, 1.0]).unwrap();
        assert!(binary_labels(&wrong).is_err());
    }
}
