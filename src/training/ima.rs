//! Incremental Margin Algorithm
//!
//! IMA approaches the maximal-margin separator with a sequence of
//! fixed-margin perceptron stages. Every converged stage re-centres the bias
//! between the classes, measures the geometric margin it achieved and uses
//! that as the target of the next stage. Stages stop once the margin gain
//! falls within `tolerance`, or once a target proves infeasible, in which
//! case the last converged solution is kept.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::models::{
    log_fit, sign, Classifier, DualModel, FitReport, FitStatus, Learner, PrimalModel,
};
use super::online::{
    centre_between_classes, dual_epochs, primal_decision, primal_epochs, DualState,
    KernelExpansion, MarginNorm, MarginRule, PassOrder, Visitor,
};
use super::perceptron::{dual_inputs, primal_inputs, FixedMarginConfig};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// IMA configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImaConfig {
    /// Epoch budget of every stage
    pub max_epochs: usize,
    /// Maximum number of margin-raising stages
    pub max_stages: usize,
    pub learning_rate: f64,
    /// Relative margin gain below which the margin counts as stable
    pub tolerance: f64,
    /// Next target is `achieved · (1 + margin_increment)`
    pub margin_increment: f64,
    /// Norm of the primal weight vector (the dual form uses the kernel norm)
    pub margin_norm: MarginNorm,
    /// Visit examples corrected in the last epoch first
    pub mistakes_first: bool,
    pub pass_order: PassOrder,
    pub random_state: Option<u64>,
    pub kernel: Kernel,
}

impl Default for ImaConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            max_stages: 50,
            learning_rate: 1.0,
            tolerance: 1e-3,
            margin_increment: 0.0,
            margin_norm: MarginNorm::L2,
            mistakes_first: true,
            pass_order: PassOrder::Sequential,
            random_state: Some(42),
            kernel: Kernel::Linear,
        }
    }
}

impl ImaConfig {
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_max_stages(mut self, max_stages: usize) -> Self {
        self.max_stages = max_stages;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_margin_increment(mut self, margin_increment: f64) -> Self {
        self.margin_increment = margin_increment;
        self
    }

    pub fn with_margin_norm(mut self, margin_norm: MarginNorm) -> Self {
        self.margin_norm = margin_norm;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(MltkError::invalid_config("max_epochs", self.max_epochs, "must be at least 1"));
        }
        if self.max_stages == 0 {
            return Err(MltkError::invalid_config("max_stages", self.max_stages, "must be at least 1"));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(MltkError::invalid_config(
                "learning_rate",
                self.learning_rate,
                "must be positive and finite",
            ));
        }
        if self.tolerance < 0.0 || !self.tolerance.is_finite() {
            return Err(MltkError::invalid_config(
                "tolerance",
                self.tolerance,
                "must be non-negative and finite",
            ));
        }
        if self.margin_increment < 0.0 || !self.margin_increment.is_finite() {
            return Err(MltkError::invalid_config(
                "margin_increment",
                self.margin_increment,
                "must be non-negative and finite",
            ));
        }
        self.margin_norm.validate()?;
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

/// Fixed-margin IMA stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImaFixedMarginConfig {
    #[serde(flatten)]
    pub fixed: FixedMarginConfig,
    /// Weight of the per-example soft-margin term
    pub flexible: f64,
    pub mistakes_first: bool,
}

impl Default for ImaFixedMarginConfig {
    fn default() -> Self {
        Self {
            fixed: FixedMarginConfig::default(),
            flexible: 0.0,
            mistakes_first: true,
        }
    }
}

impl ImaFixedMarginConfig {
    pub fn with_fixed(mut self, fixed: FixedMarginConfig) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn with_flexible(mut self, flexible: f64) -> Self {
        self.flexible = flexible;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.fixed.validate()?;
        if self.flexible < 0.0 || !self.flexible.is_finite() {
            return Err(MltkError::invalid_config(
                "flexible",
                self.flexible,
                "must be non-negative and finite",
            ));
        }
        Ok(())
    }
}

/// Smallest `y·f(x) / ‖w‖` over the training set
fn geometric_margin(f: &Array1<f64>, y: &Array1<f64>, norm: f64) -> f64 {
    if norm <= 0.0 {
        return 0.0;
    }
    f.iter()
        .zip(y.iter())
        .map(|(fi, yi)| yi * fi)
        .fold(f64::INFINITY, f64::min)
        / norm
}

/// Where the stage loop stands after one stage
enum StageOutcome {
    /// Keep raising the target
    Continue(f64),
    Stop(FitStatus),
}

/// Shared stage bookkeeping for the primal and dual forms
struct StageTracker {
    previous: Option<f64>,
    tolerance: f64,
    increment: f64,
}

impl StageTracker {
    fn new(config: &ImaConfig) -> Self {
        Self {
            previous: None,
            tolerance: config.tolerance,
            increment: config.margin_increment,
        }
    }

    fn after_stage(&mut self, margin: f64) -> StageOutcome {
        if let Some(previous) = self.previous {
            if margin - previous <= self.tolerance * margin {
                return StageOutcome::Stop(FitStatus::Converged);
            }
        }
        self.previous = Some(margin);
        StageOutcome::Continue(margin * (1.0 + self.increment))
    }
}

// ============ IMA Primal ============

/// Incremental Margin Algorithm on an explicit weight vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IMAp {
    config: ImaConfig,
    model: Option<PrimalModel>,
    margin: Option<f64>,
    input_dim: usize,
}

impl IMAp {
    pub fn new(config: ImaConfig) -> Self {
        Self {
            config,
            model: None,
            margin: None,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &ImaConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PrimalModel> {
        self.model.as_ref()
    }

    /// Geometric margin achieved on the training data
    pub fn margin(&self) -> Option<f64> {
        self.margin
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl Default for IMAp {
    fn default() -> Self {
        Self::new(ImaConfig::default())
    }
}

impl<T: Feature> Learner<T> for IMAp {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.margin = None;
        self.config.validate_primal()?;
        let kernel = self.config.kernel;
        debug!(algorithm = "ima_primal", n_samples = data.len(), dim = data.dim(), "Fitting");

        let (y, phi) = primal_inputs(&kernel, data)?;
        let norm_kind = self.config.margin_norm;
        let mut model = PrimalModel::zeros(kernel.feature_dim(data.dim())?);
        let mut counts = vec![0.0; data.len()];
        let mut visitor = Visitor::new(
            data.len(),
            self.config.pass_order,
            self.config.random_state,
            self.config.mistakes_first,
        );

        let mut tracker = StageTracker::new(&self.config);
        let mut best: Option<(PrimalModel, f64)> = None;
        let mut gamma = 0.0;
        let mut updates = 0;
        let mut stages = 0;
        let mut status = FitStatus::BudgetExhausted;

        while stages < self.config.max_stages {
            stages += 1;
            let rule = MarginRule::fixed(gamma, self.config.learning_rate);
            let stage = primal_epochs(
                &mut model,
                &phi,
                &y,
                norm_kind,
                rule,
                &mut counts,
                &mut visitor,
                self.config.max_epochs,
            );
            updates += stage.updates;

            if !stage.is_converged() {
                // Target infeasible within the budget: fall back to the last
                // converged stage, if any
                if let Some((previous, _)) = &best {
                    model = previous.clone();
                    status = FitStatus::Converged;
                }
                debug!(stage = stages, gamma, "IMA stage did not converge");
                break;
            }

            let g: Array1<f64> = phi.iter().map(|x| model.weights.dot(x)).collect();
            let (bias, half_gap) = centre_between_classes(&g, &y);
            model.bias = bias;
            model.norm = norm_kind.of(&model.weights);
            let margin = half_gap / model.norm;
            debug!(stage = stages, gamma, margin, epochs = stage.iterations, "IMA stage converged");
            best = Some((model.clone(), margin));

            match tracker.after_stage(margin) {
                StageOutcome::Continue(next) => gamma = next,
                StageOutcome::Stop(s) => {
                    status = s;
                    break;
                }
            }
        }

        let report = FitReport {
            status,
            iterations: stages,
            updates,
        };
        log_fit("ima_primal", &report);

        let margin = match &best {
            Some((_, margin)) => *margin,
            None => {
                let f: Array1<f64> = phi.iter().map(|x| model.weights.dot(x) + model.bias).collect();
                geometric_margin(&f, &y, model.norm)
            }
        };
        self.model = Some(best.map(|(m, _)| m).unwrap_or(model));
        self.margin = Some(margin);
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
        "ima_primal"
    }
}

impl<T: Feature> Classifier<T> for IMAp {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        let model = self.model.as_ref().ok_or(MltkError::NotFitted)?;
        primal_decision(model, &self.config.kernel, self.input_dim, point)
    }
}

// ============ IMA Primal, single fixed-margin stage ============

/// One fixed-margin IMA stage: soft (flexible) margin, mistake-first visit
/// order and bias re-centring after convergence while the classes stay separated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IMApFixedMargin {
    config: ImaFixedMarginConfig,
    model: Option<PrimalModel>,
    margin: Option<f64>,
    input_dim: usize,
}

impl IMApFixedMargin {
    pub fn new(config: ImaFixedMarginConfig) -> Self {
        Self {
            config,
            model: None,
            margin: None,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &ImaFixedMarginConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&PrimalModel> {
        self.model.as_ref()
    }

    /// Geometric margin achieved on the training data
    pub fn margin(&self) -> Option<f64> {
        self.margin
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}

impl<T: Feature> Learner<T> for IMApFixedMargin {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.margin = None;
        self.config.validate()?;
        let base = &self.config.fixed.perceptron;
        base.validate_primal()?;
        debug!(
            algorithm = "ima_fixed_margin_primal",
            n_samples = data.len(),
            dim = data.dim(),
            margin = self.config.fixed.margin,
            "Fitting"
        );

        let (y, phi) = primal_inputs(&base.kernel, data)?;
        let norm_kind = self.config.fixed.margin_norm;
        let mut model = PrimalModel::zeros(base.kernel.feature_dim(data.dim())?);
        let mut counts = vec![0.0; data.len()];
        let mut visitor = Visitor::new(
            data.len(),
            base.pass_order,
            base.random_state,
            self.config.mistakes_first,
        );
        let rule = MarginRule {
            gamma: self.config.fixed.margin,
            rate: base.learning_rate,
            flexible: self.config.flexible,
        };
        let report = primal_epochs(
            &mut model,
            &phi,
            &y,
            norm_kind,
            rule,
            &mut counts,
            &mut visitor,
            base.max_epochs,
        );
        log_fit("ima_fixed_margin_primal", &report);

        if report.is_converged() && model.norm > 0.0 {
            let g: Array1<f64> = phi.iter().map(|x| model.weights.dot(x)).collect();
            // Tolerated points can leave the classes overlapping along w; a
            // midpoint between them would then flip the boundary
            let (bias, half_gap) = centre_between_classes(&g, &y);
            if half_gap > 0.0 {
                model.bias = bias;
            }
        }
        let f: Array1<f64> = phi.iter().map(|x| model.weights.dot(x) + model.bias).collect();
        self.margin = Some(geometric_margin(&f, &y, model.norm));
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
        "ima_fixed_margin_primal"
    }
}

impl<T: Feature> Classifier<T> for IMApFixedMargin {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        let model = self.model.as_ref().ok_or(MltkError::NotFitted)?;
        primal_decision(model, &self.config.fixed.perceptron.kernel, self.input_dim, point)
    }
}

// ============ IMA Dual ============

/// Incremental Margin Algorithm over kernel coefficients
#[derive(Debug, Clone)]
pub struct IMADual<T = f64> {
    config: ImaConfig,
    model: Option<DualModel>,
    expansion: Option<KernelExpansion<T>>,
    margin: Option<f64>,
}

impl<T: Feature> IMADual<T> {
    pub fn new(config: ImaConfig) -> Self {
        Self {
            config,
            model: None,
            expansion: None,
            margin: None,
        }
    }

    pub fn config(&self) -> &ImaConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&DualModel> {
        self.model.as_ref()
    }

    /// Geometric margin achieved in kernel feature space
    pub fn margin(&self) -> Option<f64> {
        self.margin
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

impl<T: Feature> Learner<T> for IMADual<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.expansion = None;
        self.margin = None;
        self.config.validate()?;
        debug!(algorithm = "ima_dual", n_samples = data.len(), dim = data.dim(), "Fitting");

        let (y, gram) = dual_inputs(&self.config.kernel, data)?;
        let mut state = DualState::new(data.len());
        let mut visitor = Visitor::new(
            data.len(),
            self.config.pass_order,
            self.config.random_state,
            self.config.mistakes_first,
        );

        let mut tracker = StageTracker::new(&self.config);
        let mut best: Option<(DualModel, f64)> = None;
        let mut gamma = 0.0;
        let mut updates = 0;
        let mut stages = 0;
        let mut status = FitStatus::BudgetExhausted;

        while stages < self.config.max_stages {
            stages += 1;
            let rule = MarginRule::fixed(gamma, self.config.learning_rate);
            let stage = dual_epochs(
                &mut state,
                &gram,
                &y,
                rule,
                &mut visitor,
                self.config.max_epochs,
            );
            updates += stage.updates;

            if !stage.is_converged() {
                if let Some((previous, _)) = &best {
                    state.model = previous.clone();
                    status = FitStatus::Converged;
                }
                debug!(stage = stages, gamma, "IMA stage did not converge");
                break;
            }

            state.refresh(&gram, &y);
            let (bias, half_gap) = centre_between_classes(&state.func, &y);
            state.model.bias = bias;
            let margin = half_gap / state.model.norm;
            debug!(stage = stages, gamma, margin, epochs = stage.iterations, "IMA stage converged");
            best = Some((state.model.clone(), margin));

            match tracker.after_stage(margin) {
                StageOutcome::Continue(next) => gamma = next,
                StageOutcome::Stop(s) => {
                    status = s;
                    break;
                }
            }
        }

        let report = FitReport {
            status,
            iterations: stages,
            updates,
        };
        log_fit("ima_dual", &report);

        let (model, margin) = match best {
            Some(found) => found,
            None => {
                state.refresh(&gram, &y);
                let f = &state.func + state.model.bias;
                let margin = geometric_margin(&f, &y, state.model.norm);
                (state.model, margin)
            }
        };
        let expansion =
            KernelExpansion::new(Arc::clone(data), self.config.kernel, &(&model.alphas * &y), model.bias);
        self.model = Some(model);
        self.expansion = Some(expansion);
        self.margin = Some(margin);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.decision_function(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "ima_dual"
    }
}

impl<T: Feature> Classifier<T> for IMADual<T> {
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
    use crate::training::perceptron::PerceptronConfig;

    const OPTIMAL_MARGIN: f64 = 2.0 * std::f64::consts::SQRT_2;

    fn four_points() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    #[test]
    fn test_imap_reaches_maximal_margin() {
        let data = four_points();
        let mut clf = IMAp::default();
        let report = clf.fit(&data).unwrap();

        assert!(report.is_converged());
        let margin = clf.margin().unwrap();
        assert!(margin >= 0.9 * OPTIMAL_MARGIN, "margin {}", margin);
        assert!(margin <= OPTIMAL_MARGIN + 1e-9);
        assert_eq!(clf.predict(&Point::unlabeled(vec![3.4, 3.4])).unwrap(), 1.0);
        assert_eq!(clf.predict(&Point::unlabeled(vec![2.6, 2.6])).unwrap(), -1.0);
    }

    #[test]
    fn test_ima_dual_matches_primal_with_linear_kernel() {
        let data = four_points();
        let mut primal = IMAp::default();
        let mut dual = IMADual::new(ImaConfig::default());
        primal.fit(&data).unwrap();
        dual.fit(&data).unwrap();

        assert!((primal.margin().unwrap() - dual.margin().unwrap()).abs() < 1e-6);
        for x in [vec![2.0, 3.0], vec![4.0, 1.0], vec![-1.0, 7.5]] {
            let p = Point::unlabeled(x);
            let a = primal.decision_function(&p).unwrap();
            let b = dual.decision_function(&p).unwrap();
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ima_on_non_separable_data_exhausts_budget() {
        let data = Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared();
        let mut clf = IMAp::new(ImaConfig::default().with_max_epochs(25));
        let report = clf.fit(&data).unwrap();

        assert_eq!(report.status, FitStatus::BudgetExhausted);
        assert_eq!(report.iterations, 1);
        assert!(clf.is_fitted());
    }

    #[test]
    fn test_ima_dual_rbf_separates_xor() {
        let data = Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 0.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared();
        let mut clf = IMADual::new(ImaConfig::default().with_kernel(Kernel::Rbf { gamma: 1.0 }));
        assert!(clf.fit(&data).unwrap().is_converged());
        assert!(clf.margin().unwrap() > 0.0);
        for p in data.iter() {
            assert_eq!(clf.predict(p).unwrap(), p.label().unwrap());
        }
    }

    #[test]
    fn test_fixed_margin_stage_recentres_bias() {
        let data = four_points();
        let config = ImaFixedMarginConfig::default()
            .with_fixed(FixedMarginConfig::default().with_margin(1.0));
        let mut clf = IMApFixedMargin::new(config);
        assert!(clf.fit(&data).unwrap().is_converged());

        let margin = clf.margin().unwrap();
        assert!(margin >= 1.0, "margin {}", margin);

        // After re-centring both classes sit at the same distance
        let model = clf.model().unwrap();
        let neg = clf.decision_function(&data.points()[1]).unwrap();
        let pos = clf.decision_function(&data.points()[2]).unwrap();
        assert!((pos + neg).abs() < 1e-9);
        assert!((pos / model.norm - margin).abs() < 1e-9);
    }

    fn data_with_outlier() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![
                vec![0.0, 0.0],
                vec![1.0, 1.0],
                vec![5.0, 5.0],
                vec![6.0, 6.0],
                vec![5.5, 5.0],
            ],
            vec![-1.0, -1.0, 1.0, 1.0, -1.0],
        )
        .unwrap()
        .shared()
    }

    fn flexible_stage(flexible: f64) -> IMApFixedMargin {
        let fixed = FixedMarginConfig::default()
            .with_margin(0.5)
            .with_perceptron(PerceptronConfig::default().with_max_epochs(200));
        IMApFixedMargin::new(
            ImaFixedMarginConfig::default()
                .with_fixed(fixed)
                .with_flexible(flexible),
        )
    }

    #[test]
    fn test_flexible_margin_tolerates_an_outlier() {
        let data = data_with_outlier();
        let mut clf = flexible_stage(5.0);
        assert!(clf.fit(&data).unwrap().is_converged());
    }

    #[test]
    fn test_flexible_margin_keeps_clean_points_correct() {
        let data = data_with_outlier();
        let mut clf = flexible_stage(2.0);
        assert!(clf.fit(&data).unwrap().is_converged());

        // The tolerated outlier overlaps the positives along w, so the
        // bias is left where the corrections put it
        for p in &data.points()[..4] {
            assert_eq!(clf.predict(p).unwrap(), p.label().unwrap(), "{:?}", p.to_f64());
        }
        assert_eq!(clf.model().unwrap().bias, -19.0);
        assert!(clf.margin().unwrap() < 0.0);
    }

    #[test]
    fn test_invalid_config() {
        let data = four_points();
        let mut clf = IMAp::new(ImaConfig::default().with_tolerance(-1.0));
        assert!(matches!(
            clf.fit(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
    }
}
