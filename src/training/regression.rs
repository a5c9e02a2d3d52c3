//! Online regressors
//!
//! [`LmsPrimal`] is the least-mean-squares (Widrow-Hoff) rule on an explicit
//! weight vector. [`DualRegressor`] keeps one bounded coefficient per
//! training example and corrects it from residuals outside an ε-tube.

use ndarray::Array1;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::models::{log_fit, DualModel, FitReport, Learner, PrimalModel, Regressor};
use super::online::{map_features, primal_decision, KernelExpansion};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

fn check_rate(learning_rate: f64) -> Result<()> {
    if learning_rate <= 0.0 || !learning_rate.is_finite() {
        return Err(MltkError::invalid_config(
            "learning_rate",
            learning_rate,
            "must be positive and finite",
        ));
    }
    Ok(())
}

fn check_epochs(max_epochs: usize) -> Result<()> {
    if max_epochs == 0 {
        return Err(MltkError::invalid_config("max_epochs", max_epochs, "must be at least 1"));
    }
    Ok(())
}

// ============ LMS ============

/// Least-mean-squares configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmsConfig {
    pub max_epochs: usize,
    /// Step size η of `w += η·(y − f(x))·x`
    pub learning_rate: f64,
    /// Stop once the mean squared residual of an epoch drops below this
    pub tolerance: f64,
    /// Reshuffle the visit order every epoch
    pub shuffle: bool,
    pub random_state: Option<u64>,
    /// Kernel with an explicit feature map (linear or polynomial degree ≤ 2)
    pub kernel: Kernel,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            learning_rate: 0.01,
            tolerance: 1e-8,
            shuffle: false,
            random_state: Some(42),
            kernel: Kernel::Linear,
        }
    }
}

impl LmsConfig {
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_epochs(self.max_epochs)?;
        check_rate(self.learning_rate)?;
        if self.tolerance < 0.0 || !self.tolerance.is_finite() {
            return Err(MltkError::invalid_config(
                "tolerance",
                self.tolerance,
                "must be non-negative and finite",
            ));
        }
        self.kernel.validate()?;
        if !self.kernel.has_feature_map() {
            return Err(MltkError::invalid_config(
                "kernel",
                format!("{:?}", self.kernel),
                "LMS needs a kernel with an explicit feature map",
            ));
        }
        Ok(())
    }
}

/// Least-mean-squares regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmsPrimal {
    config: LmsConfig,
    model: Option<PrimalModel>,
    input_dim: usize,
}

impl LmsPrimal {
    pub fn new(config: LmsConfig) -> Self {
        Self {
            config,
            model: None,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &LmsConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PrimalModel> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl Default for LmsPrimal {
    fn default() -> Self {
        Self::new(LmsConfig::default())
    }
}

impl<T: Feature> Learner<T> for LmsPrimal {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.config.validate()?;
        data.ensure_non_empty()?;
        let y = data.targets()?;
        debug!(
            algorithm = "lms",
            n_samples = data.len(),
            dim = data.dim(),
            learning_rate = self.config.learning_rate,
            "Fitting"
        );

        let phi = map_features(&self.config.kernel, data)?;
        let n = data.len();
        let eta = self.config.learning_rate;
        let mut model = PrimalModel::zeros(self.config.kernel.feature_dim(data.dim())?);
        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        let mut indices: Vec<usize> = (0..n).collect();
        let mut report = FitReport::exhausted(self.config.max_epochs, 0);

        for epoch in 0..self.config.max_epochs {
            if self.config.shuffle {
                indices.shuffle(&mut rng);
            }
            let mut sse = 0.0;
            for &i in &indices {
                let residual = y[i] - (model.weights.dot(&phi[i]) + model.bias);
                sse += residual * residual;
                model.weights.scaled_add(eta * residual, &phi[i]);
                model.bias += eta * residual;
            }
            if !sse.is_finite() {
                return Err(MltkError::invalid_config(
                    "learning_rate",
                    eta,
                    "training diverged; use a smaller step size",
                ));
            }

            let mse = sse / n as f64;
            if mse < self.config.tolerance {
                report = FitReport::converged(epoch + 1, (epoch + 1) * n);
                break;
            }
            report.updates = (epoch + 1) * n;
        }

        log_fit("lms", &report);
        model.norm = model.weights.dot(&model.weights).sqrt();
        self.model = Some(model);
        self.input_dim = data.dim();
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let model = self.model.as_ref().ok_or(MltkError::NotFitted)?;
        primal_decision(model, &self.config.kernel, self.input_dim, point)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "lms"
    }
}

impl<T: Feature> Regressor<T> for LmsPrimal {}

// ============ Dual regressor ============

/// Dual (kernel) regressor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualRegressorConfig {
    pub max_epochs: usize,
    pub learning_rate: f64,
    /// Half-width of the insensitive tube
    pub epsilon: f64,
    /// Box bound on every coefficient: `−C ≤ beta ≤ C`
    pub c: f64,
    /// Stop once no coefficient changes by more than this in an epoch
    pub tolerance: f64,
    pub kernel: Kernel,
}

impl Default for DualRegressorConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            learning_rate: 0.01,
            epsilon: 0.1,
            c: 10.0,
            tolerance: 1e-4,
            kernel: Kernel::Linear,
        }
    }
}

impl DualRegressorConfig {
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_epochs(self.max_epochs)?;
        check_rate(self.learning_rate)?;
        if self.epsilon < 0.0 || !self.epsilon.is_finite() {
            return Err(MltkError::invalid_config(
                "epsilon",
                self.epsilon,
                "must be non-negative and finite",
            ));
        }
        if self.c <= 0.0 || self.c.is_nan() {
            return Err(MltkError::invalid_config("c", self.c, "must be positive"));
        }
        if self.tolerance < 0.0 || !self.tolerance.is_finite() {
            return Err(MltkError::invalid_config(
                "tolerance",
                self.tolerance,
                "must be non-negative and finite",
            ));
        }
        self.kernel.validate()
    }
}

/// Kernel regressor trained online on the ε-insensitive loss
#[derive(Debug, Clone)]
pub struct DualRegressor<T = f64> {
    config: DualRegressorConfig,
    model: Option<DualModel>,
    expansion: Option<KernelExpansion<T>>,
}

impl<T: Feature> DualRegressor<T> {
    pub fn new(config: DualRegressorConfig) -> Self {
        Self {
            config,
            model: None,
            expansion: None,
        }
    }

    pub fn config(&self) -> &DualRegressorConfig {
        &self.config
    }

    /// Fitted coefficients; `alphas` holds the signed `beta` values
    pub fn model(&self) -> Option<&DualModel> {
        self.model.as_ref()
    }

    pub fn support_indices(&self) -> Vec<usize> {
        self.model
            .as_ref()
            .map(|m| m.support_indices())
            .unwrap_or_default()
    }

    pub fn n_support_vectors(&self) -> usize {
        self.support_indices().len()
    }

    pub fn training_data(&self) -> Option<&Arc<Data<T>>> {
        self.expansion.as_ref().map(|e| e.data())
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl<T: Feature> Default for DualRegressor<T> {
    fn default() -> Self {
        Self::new(DualRegressorConfig::default())
    }
}

impl<T: Feature> Learner<T> for DualRegressor<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.expansion = None;
        self.config.validate()?;
        data.ensure_non_empty()?;
        let y = data.targets()?;
        debug!(
            algorithm = "dual_regressor",
            n_samples = data.len(),
            dim = data.dim(),
            epsilon = self.config.epsilon,
            "Fitting"
        );

        let gram = self.config.kernel.gram_matrix(data)?;
        let n = data.len();
        let (eta, eps, c) = (self.config.learning_rate, self.config.epsilon, self.config.c);
        let mut beta: Array1<f64> = Array1::zeros(n);
        let mut bias = 0.0;
        // Σ beta_j k(x_j, x_i), without the bias
        let mut func: Array1<f64> = Array1::zeros(n);
        let mut updates = 0;
        let mut report = FitReport::exhausted(self.config.max_epochs, 0);

        for epoch in 0..self.config.max_epochs {
            let mut max_change: f64 = 0.0;

            for i in 0..n {
                let residual = y[i] - (func[i] + bias);
                if residual.abs() <= eps {
                    continue;
                }
                let step = eta * (residual - eps * residual.signum());
                let new_beta = (beta[i] + step).clamp(-c, c);
                let delta = new_beta - beta[i];
                if delta != 0.0 {
                    func.scaled_add(delta, &gram.row(i));
                    beta[i] = new_beta;
                }
                bias += step;
                max_change = max_change.max(delta.abs()).max(step.abs());
                updates += 1;
            }

            if !max_change.is_finite() || !bias.is_finite() {
                return Err(MltkError::invalid_config(
                    "learning_rate",
                    eta,
                    "training diverged; use a smaller step size",
                ));
            }
            if max_change < self.config.tolerance {
                report = FitReport::converged(epoch + 1, updates);
                break;
            }
            report.updates = updates;
        }
        log_fit("dual_regressor", &report);

        let norm = beta.dot(&gram.dot(&beta)).max(0.0).sqrt();
        self.expansion = Some(KernelExpansion::new(
            Arc::clone(data),
            self.config.kernel,
            &beta,
            bias,
        ));
        self.model = Some(DualModel {
            alphas: beta,
            bias,
            norm,
        });
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.expansion
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .decision(point)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "dual_regressor"
    }
}

impl<T: Feature> Regressor<T> for DualRegressor<T> {}
