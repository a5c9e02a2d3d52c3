//! Perceptron classifiers
//!
//! Primal and dual forms of the mistake-driven perceptron, plus fixed-margin
//! variants that keep correcting until every example clears a required
//! geometric margin.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::models::{
    binary_labels, log_fit, sign, Classifier, DualModel, FitReport, Learner, PrimalModel,
};
use super::online::{
    dual_epochs, map_features, primal_decision, primal_epochs, DualState, KernelExpansion,
    MarginNorm, MarginRule, PassOrder, Visitor,
};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// Perceptron configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptronConfig {
    /// Maximum number of passes over the training set
    pub max_epochs: usize,
    /// Step size η of every correction
    pub learning_rate: f64,
    pub pass_order: PassOrder,
    /// Seed for shuffled pass order
    pub random_state: Option<u64>,
    /// Kernel; primal learners accept only kernels with an explicit feature map
    pub kernel: Kernel,
}

impl Default for PerceptronConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            learning_rate: 1.0,
            pass_order: PassOrder::Sequential,
            random_state: Some(42),
            kernel: Kernel::Linear,
        }
    }
}

impl PerceptronConfig {
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_pass_order(mut self, pass_order: PassOrder) -> Self {
        self.pass_order = pass_order;
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
        if self.max_epochs == 0 {
            return Err(MltkError::invalid_config(
                "max_epochs",
                self.max_epochs,
                "must be at least 1",
            ));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(MltkError::invalid_config(
                "learning_rate",
                self.learning_rate,
                "must be positive and finite",
            ));
        }
        self.kernel.validate()
    }

    pub(crate) fn validate_primal(&self) -> Result<()> {
        self.validate()?;
        if !self.kernel.has_feature_map() {
            return Err(MltkError::invalid_config(
                "kernel",
                format!("{:?}", self.kernel),
                "primal learners support only the linear kernel and polynomial kernels of degree 1 or 2",
            ));
        }
        Ok(())
    }
}

/// Fixed-margin perceptron configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedMarginConfig {
    #[serde(flatten)]
    pub perceptron: PerceptronConfig,
    /// Required geometric margin γ
    pub margin: f64,
    /// Norm the primal form measures ‖w‖ with (the dual form uses the kernel norm)
    pub margin_norm: MarginNorm,
}

impl Default for FixedMarginConfig {
    fn default() -> Self {
        Self {
            perceptron: PerceptronConfig::default(),
            margin: 1.0,
            margin_norm: MarginNorm::L2,
        }
    }
}

impl FixedMarginConfig {
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_margin_norm(mut self, margin_norm: MarginNorm) -> Self {
        self.margin_norm = margin_norm;
        self
    }

    pub fn with_perceptron(mut self, perceptron: PerceptronConfig) -> Self {
        self.perceptron = perceptron;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.perceptron.validate()?;
        if self.margin < 0.0 || !self.margin.is_finite() {
            return Err(MltkError::invalid_config(
                "margin",
                self.margin,
                "must be non-negative and finite",
            ));
        }
        self.margin_norm.validate()
    }
}

/// Labels plus primal feature vectors for a binary primal fit
pub(crate) fn primal_inputs<T: Feature>(
    kernel: &Kernel,
    data: &Data<T>,
) -> Result<(Array1<f64>, Vec<Array1<f64>>)> {
    data.ensure_non_empty()?;
    let y = binary_labels(data)?;
    let phi = map_features(kernel, data)?;
    Ok((y, phi))
}

/// Labels plus cached Gram matrix for a binary dual fit
pub(crate) fn dual_inputs<T: Feature>(
    kernel: &Kernel,
    data: &Data<T>,
) -> Result<(Array1<f64>, Array2<f64>)> {
    data.ensure_non_empty()?;
    let y = binary_labels(data)?;
    let gram = kernel.gram_matrix(data)?;
    Ok((y, gram))
}

fn train_primal<T: Feature>(
    data: &Data<T>,
    config: &PerceptronConfig,
    margin_norm: MarginNorm,
    rule: MarginRule,
) -> Result<(PrimalModel, FitReport)> {
    let (y, phi) = primal_inputs(&config.kernel, data)?;
    let mut model = PrimalModel::zeros(config.kernel.feature_dim(data.dim())?);
    let mut counts = vec![0.0; data.len()];
    let mut visitor = Visitor::new(data.len(), config.pass_order, config.random_state, false);
    let report = primal_epochs(
        &mut model,
        &phi,
        &y,
        margin_norm,
        rule,
        &mut counts,
        &mut visitor,
        config.max_epochs,
    );
    Ok((model, report))
}

fn train_dual<T: Feature>(
    data: &Arc<Data<T>>,
    config: &PerceptronConfig,
    rule: MarginRule,
) -> Result<(DualModel, KernelExpansion<T>, FitReport)> {
    let (y, gram) = dual_inputs(&config.kernel, data)?;
    let mut state = DualState::new(data.len());
    let mut visitor = Visitor::new(data.len(), config.pass_order, config.random_state, false);
    let report = dual_epochs(&mut state, &gram, &y, rule, &mut visitor, config.max_epochs);

    let model = state.model;
    let expansion =
        KernelExpansion::new(Arc::clone(data), config.kernel, &(&model.alphas * &y), model.bias);
    Ok((model, expansion, report))
}

// ============ Primal Perceptron ============

/// Perceptron on an explicit weight vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptronPrimal {
    config: PerceptronConfig,
    model: Option<PrimalModel>,
    input_dim: usize,
}

impl PerceptronPrimal {
    pub fn new(config: PerceptronConfig) -> Self {
        Self {
            config,
            model: None,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &PerceptronConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PrimalModel> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl Default for PerceptronPrimal {
    fn default() -> Self {
        Self::new(PerceptronConfig::default())
    }
}

impl<T: Feature> Learner<T> for PerceptronPrimal {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.config.validate_primal()?;
        debug!(algorithm = "perceptron_primal", n_samples = data.len(), dim = data.dim(), "Fitting");

        let rule = MarginRule::plain(self.config.learning_rate);
        let (model, report) = train_primal(data, &self.config, MarginNorm::L2, rule)?;
        log_fit("perceptron_primal", &report);

        self.model = Some(model);
        self.input_dim = data.dim();
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.decision_function(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "perceptron_primal"
    }
}

impl<T: Feature> Classifier<T> for PerceptronPrimal {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        let model = self.model.as_ref().ok_or(MltkError::NotFitted)?;
        primal_decision(model, &self.config.kernel, self.input_dim, point)
    }
}

// ============ Fixed Margin Primal Perceptron ============

/// Primal perceptron that corrects until every example has geometric
/// margin above `margin`, shrinking `w` along the norm gradient on each
/// correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptronFixedMarginPrimal {
    config: FixedMarginConfig,
    model: Option<PrimalModel>,
    input_dim: usize,
}

impl PerceptronFixedMarginPrimal {
    pub fn new(config: FixedMarginConfig) -> Self {
        Self {
            config,
            model: None,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &FixedMarginConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PrimalModel> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl<T: Feature> Learner<T> for PerceptronFixedMarginPrimal {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.config.validate()?;
        self.config.perceptron.validate_primal()?;
        debug!(
            algorithm = "perceptron_fixed_margin_primal",
            n_samples = data.len(),
            dim = data.dim(),
            margin = self.config.margin,
            "Fitting"
        );

        let rule = MarginRule::fixed(self.config.margin, self.config.perceptron.learning_rate);
        let (model, report) =
            train_primal(data, &self.config.perceptron, self.config.margin_norm, rule)?;
        log_fit("perceptron_fixed_margin_primal", &report);

        self.model = Some(model);
        self.input_dim = data.dim();
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.decision_function(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "perceptron_fixed_margin_primal"
    }
}

impl<T: Feature> Classifier<T> for PerceptronFixedMarginPrimal {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        let model = self.model.as_ref().ok_or(MltkError::NotFitted)?;
        primal_decision(model, &self.config.perceptron.kernel, self.input_dim, point)
    }
}

// ============ Dual Perceptron ============

/// Kernel perceptron over per-example coefficients
#[derive(Debug, Clone)]
pub struct PerceptronDual<T = f64> {
    config: PerceptronConfig,
    model: Option<DualModel>,
    expansion: Option<KernelExpansion<T>>,
}

impl<T: Feature> PerceptronDual<T> {
    pub fn new(config: PerceptronConfig) -> Self {
        Self {
            config,
            model: None,
            expansion: None,
        }
    }

    pub fn config(&self) -> &PerceptronConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&DualModel> {
        self.model.as_ref()
    }

    /// Indices (into the training data) of examples with nonzero coefficient
    pub fn support_indices(&self) -> Vec<usize> {
        self.model
            .as_ref()
            .map(|m| m.support_indices())
            .unwrap_or_default()
    }

    /// Handle to the data the model was fit on
    pub fn training_data(&self) -> Option<&Arc<Data<T>>> {
        self.expansion.as_ref().map(|e| e.data())
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl<T: Feature> Learner<T> for PerceptronDual<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.expansion = None;
        self.config.validate()?;
        debug!(algorithm = "perceptron_dual", n_samples = data.len(), dim = data.dim(), "Fitting");

        let rule = MarginRule::plain(self.config.learning_rate);
        let (model, expansion, report) = train_dual(data, &self.config, rule)?;
        log_fit("perceptron_dual", &report);

        self.model = Some(model);
        self.expansion = Some(expansion);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.decision_function(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "perceptron_dual"
    }
}

impl<T: Feature> Classifier<T> for PerceptronDual<T> {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        self.expansion
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .decision(point)
    }
}

// ============ Fixed Margin Dual Perceptron ============

/// Dual perceptron with a required margin measured in kernel feature space
#[derive(Debug, Clone)]
pub struct PerceptronFixedMarginDual<T = f64> {
    config: FixedMarginConfig,
    model: Option<DualModel>,
    expansion: Option<KernelExpansion<T>>,
}

impl<T: Feature> PerceptronFixedMarginDual<T> {
    pub fn new(config: FixedMarginConfig) -> Self {
        Self {
            config,
            model: None,
            expansion: None,
        }
    }

    pub fn config(&self) -> &FixedMarginConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&DualModel> {
        self.model.as_ref()
    }

    pub fn support_indices(&self) -> Vec<usize> {
        self.model
            .as_ref()
            .map(|m| m.support_indices())
            .unwrap_or_default()
    }

    pub fn training_data(&self) -> Option<&Arc<Data<T>>> {
        self.expansion.as_ref().map(|e| e.data())
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl<T: Feature> Learner<T> for PerceptronFixedMarginDual<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.expansion = None;
        self.config.validate()?;
        debug!(
            algorithm = "perceptron_fixed_margin_dual",
            n_samples = data.len(),
            dim = data.dim(),
            margin = self.config.margin,
            "Fitting"
        );

        let rule = MarginRule::fixed(self.config.margin, self.config.perceptron.learning_rate);
        let (model, expansion, report) = train_dual(data, &self.config.perceptron, rule)?;
        log_fit("perceptron_fixed_margin_dual", &report);

        self.model = Some(model);
        self.expansion = Some(expansion);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.decision_function(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "perceptron_fixed_margin_dual"
    }
}

impl<T: Feature> Classifier<T> for PerceptronFixedMarginDual<T> {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        self.expansion
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .decision(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::FitStatus;

    fn four_points() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    fn xor() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    fn training_errors<C: Classifier<f64>>(clf: &C, data: &Data<f64>) -> usize {
        data.iter()
            .filter(|p| clf.predict(p).unwrap() != p.label().unwrap())
            .count()
    }

    #[test]
    fn test_primal_converges_on_separable_data() {
        let data = four_points();
        let mut clf = PerceptronPrimal::new(PerceptronConfig::default().with_max_epochs(10));
        let report = clf.fit(&data).unwrap();

        assert_eq!(report.status, FitStatus::Converged);
        assert_eq!(training_errors(&clf, &data), 0);
        assert_eq!(clf.predict(&Point::unlabeled(vec![5.5, 5.5])).unwrap(), 1.0);
    }

    #[test]
    fn test_dual_converges_on_separable_data() {
        let data = four_points();
        let mut clf = PerceptronDual::new(PerceptronConfig::default().with_max_epochs(10));
        let report = clf.fit(&data).unwrap();

        assert!(report.is_converged());
        assert_eq!(training_errors(&clf, &data), 0);
        assert!(clf.model().unwrap().alphas.iter().all(|&a| a >= 0.0));
        assert!(!clf.support_indices().is_empty());
        assert!(Arc::ptr_eq(clf.training_data().unwrap(), &data));
    }

    #[test]
    fn test_xor_exhausts_budget_but_stays_usable() {
        let data = xor();
        let mut clf = PerceptronPrimal::new(PerceptronConfig::default().with_max_epochs(20));
        let report = clf.fit(&data).unwrap();

        assert_eq!(report.status, FitStatus::BudgetExhausted);
        assert_eq!(report.iterations, 20);
        assert!(clf.predict(&Point::unlabeled(vec![0.5, 0.5])).is_ok());
    }

    #[test]
    fn test_dual_polynomial_kernel_separates_xor() {
        let data = xor();
        let config = PerceptronConfig::default()
            .with_max_epochs(200)
            .with_kernel(Kernel::Polynomial {
                degree: 2,
                gamma: 1.0,
                coef0: 1.0,
            });
        let mut clf = PerceptronDual::new(config.clone());
        assert!(clf.fit(&data).unwrap().is_converged());
        assert_eq!(training_errors(&clf, &data), 0);

        // Same kernel through the explicit feature map
        let mut primal = PerceptronPrimal::new(config);
        assert!(primal.fit(&data).unwrap().is_converged());
        assert_eq!(training_errors(&primal, &data), 0);
    }

    #[test]
    fn test_primal_rejects_rbf_kernel() {
        let data = four_points();
        let mut clf = PerceptronPrimal::new(
            PerceptronConfig::default().with_kernel(Kernel::Rbf { gamma: 1.0 }),
        );
        assert!(matches!(
            clf.fit(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
        assert!(!clf.is_fitted());
    }

    #[test]
    fn test_predict_before_fit() {
        let clf = PerceptronDual::<f64>::new(PerceptronConfig::default());
        assert!(matches!(
            clf.predict(&Point::unlabeled(vec![1.0, 1.0])),
            Err(MltkError::NotFitted)
        ));
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let data = four_points();
        let mut clf = PerceptronPrimal::default();
        clf.fit(&data).unwrap();
        assert!(matches!(
            clf.predict(&Point::unlabeled(vec![1.0, 2.0, 3.0])),
            Err(MltkError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_invalid_labels() {
        let data = Data::from_rows(vec![vec![0.0], vec![1.0]], vec![0.0, 1.0])
            .unwrap()
            .shared();
        let mut clf = PerceptronPrimal::default();
        assert!(matches!(clf.fit(&data), Err(MltkError::InvalidLabels(_))));
    }

    #[test]
    fn test_empty_data() {
        let data = Data::<f64>::default().shared();
        let mut clf = PerceptronDual::new(PerceptronConfig::default());
        assert!(matches!(clf.fit(&data), Err(MltkError::EmptyData)));
    }

    #[test]
    fn test_negative_margin_rejected() {
        let data = four_points();
        let mut clf = PerceptronFixedMarginPrimal::new(FixedMarginConfig::default().with_margin(-1.0));
        assert!(matches!(
            clf.fit(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_fixed_margin_primal_clears_margin() {
        let data = four_points();
        for norm in [MarginNorm::L2, MarginNorm::L1, MarginNorm::Lp(3.0)] {
            let config = FixedMarginConfig::default()
                .with_margin(1.0)
                .with_margin_norm(norm);
            let mut clf = PerceptronFixedMarginPrimal::new(config);
            let report = clf.fit(&data).unwrap();
            assert!(report.is_converged(), "{:?} did not converge", norm);

            let model = clf.model().unwrap();
            for p in data.iter() {
                let f = clf.decision_function(p).unwrap();
                assert!(p.label().unwrap() * f > 1.0 * model.norm);
            }
        }
    }

    #[test]
    fn test_fixed_margin_dual_clears_margin() {
        let data = four_points();
        let mut clf = PerceptronFixedMarginDual::new(FixedMarginConfig::default().with_margin(1.5));
        assert!(clf.fit(&data).unwrap().is_converged());

        let norm = clf.model().unwrap().norm;
        for p in data.iter() {
            assert!(p.label().unwrap() * clf.decision_function(p).unwrap() > 1.5 * norm);
        }
    }

    #[test]
    fn test_fixed_margin_above_optimum_exhausts_budget() {
        let data = four_points();
        let config = FixedMarginConfig::default()
            .with_margin(4.0)
            .with_perceptron(PerceptronConfig::default().with_max_epochs(50));
        let mut clf = PerceptronFixedMarginPrimal::new(config);
        assert_eq!(clf.fit(&data).unwrap().status, FitStatus::BudgetExhausted);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = FixedMarginConfig::default()
            .with_margin(0.25)
            .with_margin_norm(MarginNorm::Lp(3.0));
        let json = serde_json::to_string(&config).unwrap();
        let restored: FixedMarginConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);

        let partial: PerceptronConfig = serde_json::from_str(r#"{"max_epochs": 5}"#).unwrap();
        assert_eq!(partial.max_epochs, 5);
        assert_eq!(partial.learning_rate, 1.0);
    }
}
