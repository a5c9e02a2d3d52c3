//! Mistake-driven pass loop shared by the perceptron and IMA families
//!
//! One primal and one dual routine run epochs over the training set, testing
//! each visited example against a margin rule and correcting the model on a
//! mistake. The plain perceptron is the zero-margin case.

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::models::{DualModel, FitReport, PrimalModel, SUPPORT_EPS};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// Norm a primal learner measures its margin with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum MarginNorm {
    #[default]
    L2,
    L1,
    /// General q-norm, `q ≥ 1`
    Lp(f64),
}

impl MarginNorm {
    pub fn validate(&self) -> Result<()> {
        if let MarginNorm::Lp(q) = *self {
            if q < 1.0 || !q.is_finite() {
                return Err(MltkError::invalid_config(
                    "margin_norm",
                    q,
                    "q must be finite and at least 1",
                ));
            }
        }
        Ok(())
    }

    /// ‖w‖ under this norm
    pub fn of(&self, w: &Array1<f64>) -> f64 {
        match *self {
            MarginNorm::L2 => w.dot(w).sqrt(),
            MarginNorm::L1 => w.iter().map(|v| v.abs()).sum(),
            MarginNorm::Lp(q) => w.iter().map(|v| v.abs().powf(q)).sum::<f64>().powf(1.0 / q),
        }
    }

    /// Move `w` a step of length `step` against the gradient of ‖w‖,
    /// never letting a component cross zero. Returns the new norm.
    fn shrink(&self, w: &mut Array1<f64>, norm: f64, step: f64) -> f64 {
        match *self {
            MarginNorm::L2 => {
                let lambda = (1.0 - step / norm).max(0.0);
                w.mapv_inplace(|v| lambda * v);
            }
            MarginNorm::L1 => {
                w.mapv_inplace(|v| v.signum() * (v.abs() - step).max(0.0));
            }
            MarginNorm::Lp(q) => {
                let denom = norm.powf(q - 1.0);
                w.mapv_inplace(|v| {
                    let grad = v.abs().powf(q - 1.0) / denom;
                    v.signum() * (v.abs() - step * grad).max(0.0)
                });
            }
        }
        self.of(w)
    }
}

/// Order in which each epoch visits the training examples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PassOrder {
    #[default]
    Sequential,
    /// Reshuffled every epoch from `random_state`
    Shuffled,
}

/// Mistake test and step size of one pass loop.
///
/// An example is a mistake when `y·f(x) ≤ gamma·‖w‖ − flexible·s`, where
/// `s` is the decayed update count of the example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MarginRule {
    pub gamma: f64,
    pub rate: f64,
    pub flexible: f64,
}

impl MarginRule {
    pub fn plain(rate: f64) -> Self {
        Self {
            gamma: 0.0,
            rate,
            flexible: 0.0,
        }
    }

    pub fn fixed(gamma: f64, rate: f64) -> Self {
        Self {
            gamma,
            rate,
            flexible: 0.0,
        }
    }
}

/// Visit order state carried across epochs (and IMA stages)
#[derive(Debug, Clone)]
pub(crate) struct Visitor {
    order: Vec<usize>,
    rng: Option<Xoshiro256PlusPlus>,
    mistakes_first: bool,
    front: Vec<usize>,
}

impl Visitor {
    pub fn new(
        n: usize,
        pass_order: PassOrder,
        random_state: Option<u64>,
        mistakes_first: bool,
    ) -> Self {
        let rng = match pass_order {
            PassOrder::Sequential => None,
            PassOrder::Shuffled => Some(match random_state {
                Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
                None => Xoshiro256PlusPlus::from_entropy(),
            }),
        };
        Self {
            order: (0..n).collect(),
            rng,
            mistakes_first,
            front: Vec::new(),
        }
    }

    /// Order for the next pass. Under shuffling the last epoch's mistakes
    /// still lead, the remaining examples follow in shuffled order.
    fn begin_epoch(&mut self) -> Vec<usize> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        if !self.front.is_empty() {
            let front = std::mem::take(&mut self.front);
            self.move_to_front(&front);
        }
        self.order.clone()
    }

    /// Record the examples that caused an update so the next pass visits
    /// them first, keeping their order
    fn end_epoch(&mut self, mistakes: &[usize]) {
        if !self.mistakes_first || mistakes.is_empty() {
            return;
        }
        self.front = mistakes.to_vec();
    }

    fn move_to_front(&mut self, front: &[usize]) {
        let mut seen = vec![false; self.order.len()];
        let mut order = Vec::with_capacity(self.order.len());
        for &i in front {
            if !seen[i] {
                seen[i] = true;
                order.push(i);
            }
        }
        order.extend(self.order.iter().copied().filter(|&i| !seen[i]));
        self.order = order;
    }
}

// ============ Primal ============

/// Map every training point through the kernel's explicit feature map
pub(crate) fn map_features<T: Feature>(kernel: &Kernel, data: &Data<T>) -> Result<Vec<Array1<f64>>> {
    data.iter().map(|p| kernel.feature_map(p)).collect()
}

/// Decision value of a fitted primal model for a raw input point
pub(crate) fn primal_decision<T: Feature>(
    model: &PrimalModel,
    kernel: &Kernel,
    input_dim: usize,
    point: &Point<T>,
) -> Result<f64> {
    point.check_dim(input_dim)?;
    if kernel.is_linear() {
        return Ok(point.dot(&model.weights)? + model.bias);
    }
    let phi = kernel.feature_map(point)?;
    model.decision(&phi)
}

/// Run mistake-driven epochs on a primal model until a clean pass or the
/// epoch budget. `counts` holds the decayed per-example update counts.
#[allow(clippy::too_many_arguments)]
pub(crate) fn primal_epochs(
    model: &mut PrimalModel,
    phi: &[Array1<f64>],
    y: &Array1<f64>,
    margin_norm: MarginNorm,
    rule: MarginRule,
    counts: &mut [f64],
    visitor: &mut Visitor,
    max_epochs: usize,
) -> FitReport {
    model.norm = margin_norm.of(&model.weights);
    let mut updates = 0;

    for epoch in 0..max_epochs {
        let mut mistakes = Vec::new();

        for i in visitor.begin_epoch() {
            let yi = y[i];
            let f = model.weights.dot(&phi[i]) + model.bias;
            if yi * f > rule.gamma * model.norm - rule.flexible * counts[i] {
                continue;
            }

            if rule.gamma > 0.0 && model.norm > 0.0 {
                let before = model.norm;
                let after = margin_norm.shrink(&mut model.weights, before, rule.rate * rule.gamma);
                let decay = after / before;
                counts.iter_mut().for_each(|c| *c *= decay);
            }
            model.weights.scaled_add(rule.rate * yi, &phi[i]);
            model.bias += rule.rate * yi;
            model.norm = margin_norm.of(&model.weights);
            counts[i] += rule.rate;

            updates += 1;
            mistakes.push(i);
        }

        if mistakes.is_empty() {
            return FitReport::converged(epoch + 1, updates);
        }
        visitor.end_epoch(&mistakes);
    }

    FitReport::exhausted(max_epochs, updates)
}

// ============ Dual ============

/// Working state of a dual pass loop.
///
/// `func[j] = Σ_i alpha[i]·y[i]·K[i, j]` is the decision value of example
/// `j` without the bias, kept current incrementally.
#[derive(Debug, Clone)]
pub(crate) struct DualState {
    pub model: DualModel,
    pub func: Array1<f64>,
}

impl DualState {
    pub fn new(n: usize) -> Self {
        Self {
            model: DualModel::zeros(n),
            func: Array1::zeros(n),
        }
    }

    /// Recompute `func` and the RKHS norm exactly from the coefficients
    pub fn refresh(&mut self, gram: &Array2<f64>, y: &Array1<f64>) {
        let signed = &self.model.alphas * y;
        self.func = gram.dot(&signed);
        self.model.norm = signed.dot(&self.func).max(0.0).sqrt();
    }
}

/// Dual counterpart of [`primal_epochs`]: coefficients grow by the learning
/// rate on a mistake and the norm is measured in kernel feature space.
pub(crate) fn dual_epochs(
    state: &mut DualState,
    gram: &Array2<f64>,
    y: &Array1<f64>,
    rule: MarginRule,
    visitor: &mut Visitor,
    max_epochs: usize,
) -> FitReport {
    let mut updates = 0;

    for epoch in 0..max_epochs {
        let mut mistakes = Vec::new();

        for i in visitor.begin_epoch() {
            let yi = y[i];
            let norm = state.model.norm;
            let f = state.func[i] + state.model.bias;
            if yi * f > rule.gamma * norm - rule.flexible * state.model.alphas[i] {
                continue;
            }

            let lambda = if rule.gamma > 0.0 && norm > 0.0 {
                (1.0 - rule.rate * rule.gamma / norm).max(0.0)
            } else {
                1.0
            };
            let fi = state.func[i];
            if lambda != 1.0 {
                state.model.alphas.mapv_inplace(|a| lambda * a);
                state.func.mapv_inplace(|v| lambda * v);
            }
            state.model.alphas[i] += rule.rate;
            state.model.bias += rule.rate * yi;
            state.func.scaled_add(rule.rate * yi, &gram.row(i));

            let norm_sq = lambda * lambda * norm * norm
                + 2.0 * lambda * rule.rate * yi * fi
                + rule.rate * rule.rate * gram[[i, i]];
            state.model.norm = norm_sq.max(0.0).sqrt();

            updates += 1;
            mistakes.push(i);
        }

        if mistakes.is_empty() {
            return FitReport::converged(epoch + 1, updates);
        }
        visitor.end_epoch(&mistakes);
    }

    FitReport::exhausted(max_epochs, updates)
}

// ============ Margin bookkeeping ============

/// Bias placing the boundary midway between the classes, and half the gap
/// between them, for bias-free decision values `g`.
///
/// The half gap divided by ‖w‖ is the geometric margin after re-centring.
pub(crate) fn centre_between_classes(g: &Array1<f64>, y: &Array1<f64>) -> (f64, f64) {
    let mut min_pos = f64::INFINITY;
    let mut max_neg = f64::NEG_INFINITY;
    for (&gi, &yi) in g.iter().zip(y.iter()) {
        if yi > 0.0 {
            min_pos = min_pos.min(gi);
        } else {
            max_neg = max_neg.max(gi);
        }
    }
    (-(min_pos + max_neg) / 2.0, (min_pos - max_neg) / 2.0)
}

/// Kernel expansion `f(x) = Σ coef[s]·k(x_s, x) + b` over the support examples
/// of a fitted dual learner, holding a handle to its training data.
#[derive(Debug, Clone)]
pub(crate) struct KernelExpansion<T> {
    data: Arc<Data<T>>,
    kernel: Kernel,
    support: Vec<usize>,
    coef: Vec<f64>,
    bias: f64,
}

impl<T: Feature> KernelExpansion<T> {
    /// `coefficients` are already signed (`alpha[i]·y[i]` for classifiers)
    pub fn new(data: Arc<Data<T>>, kernel: Kernel, coefficients: &Array1<f64>, bias: f64) -> Self {
        let (support, coef): (Vec<usize>, Vec<f64>) = coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.abs() > SUPPORT_EPS)
            .map(|(i, &c)| (i, c))
            .unzip();
        Self {
            data,
            kernel,
            support,
            coef,
            bias,
        }
    }

    pub fn decision(&self, point: &Point<T>) -> Result<f64> {
        point.check_dim(self.data.dim())?;
        let points = self.data.points();
        let mut sum = self.bias;
        for (&s, &c) in self.support.iter().zip(self.coef.iter()) {
            sum += c * self.kernel.evaluate(&points[s], point)?;
        }
        Ok(sum)
    }

    pub fn data(&self) -> &Arc<Data<T>> {
        &self.data
    }
}
