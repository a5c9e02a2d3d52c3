//! Sequential Minimal Optimization
//!
//! Soft-margin SVM training. SMO repeatedly picks a pair of coefficients,
//! at least one of which violates the KKT conditions, and solves the
//! two-variable subproblem in closed form under `0 ≤ alpha ≤ C` and
//! `Σ alpha·y = 0`.

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::models::{log_fit, sign, Classifier, DualModel, FitReport, Learner};
use super::online::KernelExpansion;
use super::perceptron::dual_inputs;
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// Alphas closer than this to a bound are snapped onto it
const BOUND_EPS: f64 = 1e-8;

/// Minimum relative change for a pair update to count as progress
const STEP_EPS: f64 = 1e-5;

/// How SMO picks the partner of a KKT violator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartnerHeuristic {
    /// Non-bound example maximizing `|E1 - E2|`
    #[default]
    MaxErrorGap,
    /// Uniformly random example
    Random,
}

/// SMO configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoConfig {
    /// Box constraint (C)
    pub c: f64,
    /// KKT tolerance
    pub tol: f64,
    /// Maximum number of passes over the examples
    pub max_iter: usize,
    pub kernel: Kernel,
    pub heuristic: PartnerHeuristic,
    /// Seed for scan start points and random partners
    pub random_state: Option<u64>,
}

impl Default for SmoConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            tol: 1e-3,
            max_iter: 10_000,
            kernel: Kernel::Linear,
            heuristic: PartnerHeuristic::MaxErrorGap,
            random_state: Some(42),
        }
    }
}

impl SmoConfig {
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_heuristic(mut self, heuristic: PartnerHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.c <= 0.0 || !self.c.is_finite() {
            return Err(MltkError::invalid_config("c", self.c, "must be positive and finite"));
        }
        if self.tol <= 0.0 || !self.tol.is_finite() {
            return Err(MltkError::invalid_config("tol", self.tol, "must be positive and finite"));
        }
        if self.max_iter == 0 {
            return Err(MltkError::invalid_config("max_iter", self.max_iter, "must be at least 1"));
        }
        self.kernel.validate()
    }
}

/// Working state of one SMO run
struct Solver<'a> {
    gram: &'a Array2<f64>,
    y: &'a Array1<f64>,
    c: f64,
    tol: f64,
    heuristic: PartnerHeuristic,
    alphas: Array1<f64>,
    bias: f64,
    /// `E[i] = f(x_i) - y[i]` for every example
    errors: Array1<f64>,
    rng: Xoshiro256PlusPlus,
}

impl<'a> Solver<'a> {
    fn new(gram: &'a Array2<f64>, y: &'a Array1<f64>, config: &SmoConfig) -> Self {
        let rng = match config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self {
            gram,
            y,
            c: config.c,
            tol: config.tol,
            heuristic: config.heuristic,
            alphas: Array1::zeros(y.len()),
            bias: 0.0,
            errors: y.mapv(|v| -v),
            rng,
        }
    }

    fn n(&self) -> usize {
        self.y.len()
    }

    fn is_non_bound(&self, i: usize) -> bool {
        self.alphas[i] > 0.0 && self.alphas[i] < self.c
    }

    fn violates_kkt(&self, i: usize) -> bool {
        let r = self.errors[i] * self.y[i];
        (r < -self.tol && self.alphas[i] < self.c) || (r > self.tol && self.alphas[i] > 0.0)
    }

    fn snap(&self, a: f64) -> f64 {
        if a < BOUND_EPS {
            0.0
        } else if a > self.c - BOUND_EPS {
            self.c
        } else {
            a
        }
    }

    /// Jointly optimize `alphas[i1]` and `alphas[i2]`
    fn take_step(&mut self, i1: usize, i2: usize) -> bool {
        if i1 == i2 {
            return false;
        }
        let (a1, a2) = (self.alphas[i1], self.alphas[i2]);
        let (y1, y2) = (self.y[i1], self.y[i2]);
        let (e1, e2) = (self.errors[i1], self.errors[i2]);
        let s = y1 * y2;
        let c = self.c;

        // Compute bounds
        let (l, h) = if y1 != y2 {
            ((a2 - a1).max(0.0), (c + a2 - a1).min(c))
        } else {
            ((a1 + a2 - c).max(0.0), (a1 + a2).min(c))
        };
        if h - l < 1e-12 {
            return false;
        }

        let k11 = self.gram[[i1, i1]];
        let k12 = self.gram[[i1, i2]];
        let k22 = self.gram[[i2, i2]];
        let eta = k11 + k22 - 2.0 * k12;

        let a2_new = if eta > 0.0 {
            (a2 + y2 * (e1 - e2) / eta).clamp(l, h)
        } else {
            // Objective at both ends of the segment
            let b = self.bias;
            let f1 = y1 * (e1 - b) - a1 * k11 - s * a2 * k12;
            let f2 = y2 * (e2 - b) - s * a1 * k12 - a2 * k22;
            let objective = |a2_end: f64| {
                let a1_end = a1 + s * (a2 - a2_end);
                a1_end * f1
                    + a2_end * f2
                    + 0.5 * a1_end * a1_end * k11
                    + 0.5 * a2_end * a2_end * k22
                    + s * a2_end * a1_end * k12
            };
            let (l_obj, h_obj) = (objective(l), objective(h));
            if l_obj < h_obj - STEP_EPS {
                l
            } else if l_obj > h_obj + STEP_EPS {
                h
            } else {
                a2
            }
        };
        let a2_new = self.snap(a2_new);

        if (a2_new - a2).abs() < STEP_EPS * (a2_new + a2 + STEP_EPS) {
            return false;
        }
        let a1_new = self.snap((a1 + s * (a2 - a2_new)).clamp(0.0, c));

        // Update bias
        let d1 = y1 * (a1_new - a1);
        let d2 = y2 * (a2_new - a2);
        let b1 = self.bias - e1 - d1 * k11 - d2 * k12;
        let b2 = self.bias - e2 - d1 * k12 - d2 * k22;
        let bias = if a1_new > 0.0 && a1_new < c {
            b1
        } else if a2_new > 0.0 && a2_new < c {
            b2
        } else {
            (b1 + b2) / 2.0
        };

        let delta_b = bias - self.bias;
        let row1 = self.gram.row(i1);
        let row2 = self.gram.row(i2);
        for (k, e) in self.errors.iter_mut().enumerate() {
            *e += d1 * row1[k] + d2 * row2[k] + delta_b;
        }
        self.alphas[i1] = a1_new;
        self.alphas[i2] = a2_new;
        self.bias = bias;
        true
    }

    /// Try to make progress on example `i2`; returns whether a step was taken
    fn examine(&mut self, i2: usize) -> bool {
        if !self.violates_kkt(i2) {
            return false;
        }
        let n = self.n();
        let e2 = self.errors[i2];

        // Second choice heuristic
        match self.heuristic {
            PartnerHeuristic::MaxErrorGap => {
                let best = (0..n)
                    .filter(|&i| i != i2 && self.is_non_bound(i))
                    .max_by(|&a, &b| {
                        let ga = (self.errors[a] - e2).abs();
                        let gb = (self.errors[b] - e2).abs();
                        ga.total_cmp(&gb).then(b.cmp(&a))
                    });
                if let Some(i1) = best {
                    if self.take_step(i1, i2) {
                        return true;
                    }
                }
            }
            PartnerHeuristic::Random => {
                if n > 1 {
                    let mut i1 = self.rng.gen_range(0..n - 1);
                    if i1 >= i2 {
                        i1 += 1;
                    }
                    if self.take_step(i1, i2) {
                        return true;
                    }
                }
            }
        }

        // Fall back to non-bound examples, then all examples, from random starts
        let start = self.rng.gen_range(0..n);
        for k in 0..n {
            let i1 = (start + k) % n;
            if self.is_non_bound(i1) && self.take_step(i1, i2) {
                return true;
            }
        }
        let start = self.rng.gen_range(0..n);
        for k in 0..n {
            let i1 = (start + k) % n;
            if self.take_step(i1, i2) {
                return true;
            }
        }
        false
    }

    /// Recompute the bias from the KKT conditions.
    ///
    /// With free support vectors the bias is their average; otherwise it is
    /// the midpoint of the interval the bound examples allow. Returns the
    /// size of the change.
    fn refit_bias(&mut self) -> f64 {
        let n = self.n();
        let g: Vec<f64> = (0..n)
            .map(|i| self.errors[i] + self.y[i] - self.bias)
            .collect();

        let free: Vec<usize> = (0..n).filter(|&i| self.is_non_bound(i)).collect();
        let bias = if !free.is_empty() {
            free.iter().map(|&i| self.y[i] - g[i]).sum::<f64>() / free.len() as f64
        } else {
            let mut lower = f64::NEG_INFINITY;
            let mut upper = f64::INFINITY;
            for i in 0..n {
                let at_zero = self.alphas[i] <= 0.0;
                let bound = self.y[i] - g[i];
                match (self.y[i] > 0.0, at_zero) {
                    (true, true) | (false, false) => lower = lower.max(bound),
                    (true, false) | (false, true) => upper = upper.min(bound),
                }
            }
            match (lower.is_finite(), upper.is_finite()) {
                (true, true) => (lower + upper) / 2.0,
                (true, false) => lower,
                (false, true) => upper,
                (false, false) => self.bias,
            }
        };

        let delta = bias - self.bias;
        self.errors.mapv_inplace(|e| e + delta);
        self.bias = bias;
        delta.abs()
    }

    /// Outer loop alternating full passes and passes over non-bound examples
    fn run(&mut self, max_iter: usize) -> FitReport {
        let n = self.n();
        let mut examine_all = true;
        let mut num_changed = 0;
        let mut passes = 0;
        let mut updates = 0;

        while num_changed > 0 || examine_all {
            if passes >= max_iter {
                return FitReport::exhausted(passes, updates);
            }
            passes += 1;
            num_changed = 0;

            for i in 0..n {
                if (examine_all || self.is_non_bound(i)) && self.examine(i) {
                    num_changed += 1;
                }
            }
            updates += num_changed;

            if examine_all {
                examine_all = false;
                if num_changed == 0 {
                    let shift = self.refit_bias();
                    if shift > 1e-12 && (0..n).any(|i| self.violates_kkt(i)) {
                        examine_all = true;
                    }
                }
            } else if num_changed == 0 {
                examine_all = true;
            }
        }

        FitReport::converged(passes, updates)
    }
}

/// Support vector classifier trained with SMO
#[derive(Debug, Clone)]
pub struct Smo<T = f64> {
    config: SmoConfig,
    model: Option<DualModel>,
    expansion: Option<KernelExpansion<T>>,
}

impl<T: Feature> Smo<T> {
    pub fn new(config: SmoConfig) -> Self {
        Self {
            config,
            model: None,
            expansion: None,
        }
    }

    pub fn config(&self) -> &SmoConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&DualModel> {
        self.model.as_ref()
    }

    /// Indices of the support vectors in the training data
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

impl<T: Feature> Default for Smo<T> {
    fn default() -> Self {
        Self::new(SmoConfig::default())
    }
}

impl<T: Feature> Learner<T> for Smo<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.model = None;
        self.expansion = None;
        self.config.validate()?;
        debug!(
            algorithm = "smo",
            n_samples = data.len(),
            dim = data.dim(),
            c = self.config.c,
            "Fitting"
        );

        // Precompute kernel matrix for efficiency
        let (y, gram) = dual_inputs(&self.config.kernel, data)?;
        let mut solver = Solver::new(&gram, &y, &self.config);
        let report = solver.run(self.config.max_iter);
        log_fit("smo", &report);

        let signed = &solver.alphas * &y;
        let expansion = KernelExpansion::new(Arc::clone(data), self.config.kernel, &signed, solver.bias);
        let norm = signed.dot(&gram.dot(&signed)).max(0.0).sqrt();
        self.model = Some(DualModel {
            alphas: solver.alphas,
            bias: solver.bias,
            norm,
        });
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
        "smo"
    }
}

impl<T: Feature> Classifier<T> for Smo<T> {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        self.expansion
            .as_ref()
            .ok_or(MltkError::NotFitted)?
            .decision(point)
    }
}
