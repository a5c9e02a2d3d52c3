//! Weighted committee of primal classifiers

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;
use crate::training::config::ClassifierConfig;
use crate::training::models::{binary_labels, log_fit, sign, Classifier, FitReport, Learner, PrimalModel};
use crate::training::online::primal_decision;

/// How each member's training sample is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeSampling {
    /// Resample with replacement, keeping each class's size
    #[default]
    Bootstrap,
    /// Every member sees the whole training set
    Full,
}

/// Committee configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitteeConfig {
    pub n_members: usize,
    /// Algorithm of every member; must be a primal learner
    pub member: ClassifierConfig,
    pub sampling: CommitteeSampling,
    /// Vote weight per member; uniform when absent
    pub weights: Option<Vec<f64>>,
    /// Member `i` is seeded with `random_state + i`
    pub random_state: Option<u64>,
}

impl Default for CommitteeConfig {
    fn default() -> Self {
        Self {
            n_members: 10,
            member: ClassifierConfig::default(),
            sampling: CommitteeSampling::Bootstrap,
            weights: None,
            random_state: Some(42),
        }
    }
}

impl CommitteeConfig {
    pub fn with_n_members(mut self, n_members: usize) -> Self {
        self.n_members = n_members;
        self
    }

    pub fn with_member(mut self, member: ClassifierConfig) -> Self {
        self.member = member;
        self
    }

    pub fn with_sampling(mut self, sampling: CommitteeSampling) -> Self {
        self.sampling = sampling;
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
        if self.n_members == 0 {
            return Err(MltkError::invalid_config(
                "n_members",
                self.n_members,
                "must be at least 1",
            ));
        }
        if !self.member.is_primal() {
            return Err(MltkError::invalid_config(
                "member",
                self.member.algorithm(),
                "committee members must be primal perceptron or IMA learners",
            ));
        }
        self.member.validate()?;

        if let Some(weights) = &self.weights {
            if weights.len() != self.n_members {
                return Err(MltkError::invalid_config(
                    "weights",
                    weights.len(),
                    format!("expected one weight per member ({})", self.n_members),
                ));
            }
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(MltkError::invalid_config(
                    "weights",
                    format!("{:?}", weights),
                    "weights must be finite and non-negative",
                ));
            }
            if weights.iter().sum::<f64>() <= 0.0 {
                return Err(MltkError::invalid_config(
                    "weights",
                    format!("{:?}", weights),
                    "weights must have a positive sum",
                ));
            }
        }
        Ok(())
    }

    fn member_weights(&self) -> Vec<f64> {
        self.weights
            .clone()
            .unwrap_or_else(|| vec![1.0 / self.n_members as f64; self.n_members])
    }
}

/// Committee of primal classifiers voting by weight.
///
/// Each member is fit independently and only its weight vector is kept.
/// The label is the sign of the weighted vote, so an even split predicts
/// `+1` like a zero decision value does for a single classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimalCommittee {
    config: CommitteeConfig,
    members: Vec<(f64, PrimalModel)>,
    kernel: Kernel,
    input_dim: usize,
}

impl PrimalCommittee {
    pub fn new(config: CommitteeConfig) -> Self {
        let kernel = config.member.kernel();
        Self {
            config,
            members: Vec::new(),
            kernel,
            input_dim: 0,
        }
    }

    pub fn config(&self) -> &CommitteeConfig {
        &self.config
    }

    /// `(weight, model)` of every fitted member, in member order
    pub fn members(&self) -> &[(f64, PrimalModel)] {
        &self.members
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Weight voting `+1` minus weight voting `-1`
    fn vote<T: Feature>(&self, point: &Point<T>) -> Result<f64> {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        let mut margin = 0.0;
        for (weight, model) in &self.members {
            let f = primal_decision(model, &self.kernel, self.input_dim, point)?;
            if f >= 0.0 {
                margin += weight;
            } else {
                margin -= weight;
            }
        }
        Ok(margin)
    }
}

impl Default for PrimalCommittee {
    fn default() -> Self {
        Self::new(CommitteeConfig::default())
    }
}

/// Indices of a class-preserving bootstrap resample
fn bootstrap_indices(y: &[f64], rng: &mut ChaCha8Rng) -> Vec<usize> {
    let (pos, neg): (Vec<usize>, Vec<usize>) = (0..y.len()).partition(|&i| y[i] > 0.0);
    let mut indices = Vec::with_capacity(y.len());
    for class in [&neg, &pos] {
        for _ in 0..class.len() {
            indices.push(class[rng.gen_range(0..class.len())]);
        }
    }
    indices
}

impl<T: Feature> Learner<T> for PrimalCommittee {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.members.clear();
        self.config.validate()?;
        data.ensure_non_empty()?;
        let y = binary_labels(data)?.to_vec();

        self.kernel = self.config.member.kernel();
        self.input_dim = data.dim();
        debug!(
            algorithm = "primal_committee",
            n_samples = data.len(),
            dim = data.dim(),
            n_members = self.config.n_members,
            sampling = ?self.config.sampling,
            "Fitting"
        );

        let config = &self.config;
        let fitted = (0..config.n_members)
            .into_par_iter()
            .map(|i| {
                let seed = config.random_state.map(|s| s.wrapping_add(i as u64));
                let member_config = match seed {
                    Some(s) => config.member.with_random_state(s),
                    None => config.member.clone(),
                };
                let sample = match config.sampling {
                    CommitteeSampling::Full => Arc::clone(data),
                    CommitteeSampling::Bootstrap => {
                        let mut rng = match seed {
                            Some(s) => ChaCha8Rng::seed_from_u64(s),
                            None => ChaCha8Rng::from_entropy(),
                        };
                        data.select(&bootstrap_indices(&y, &mut rng))?.shared()
                    }
                };

                let mut learner = member_config.build::<T>();
                let report = learner.fit(&sample)?;
                let model = learner.primal_model().cloned().ok_or(MltkError::NotFitted)?;
                Ok((model, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = fitted
            .iter()
            .map(|(_, r)| *r)
            .reduce(FitReport::merge)
            .unwrap_or_else(|| FitReport::converged(0, 0));
        self.members = config
            .member_weights()
            .into_iter()
            .zip(fitted.into_iter().map(|(m, _)| m))
            .collect();

        log_fit("primal_committee", &report);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        self.vote(point).map(sign)
    }

    fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    fn name(&self) -> &'static str {
        "primal_committee"
    }
}

impl<T: Feature> Classifier<T> for PrimalCommittee {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        self.vote(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::ima::ImaConfig;
    use crate::training::models::FitStatus;
    use crate::training::online::PassOrder;
    use crate::training::perceptron::PerceptronConfig;

    fn create_separable_data() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![
                vec![0.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 1.0],
                vec![5.0, 5.0],
                vec![6.0, 6.0],
                vec![6.0, 5.0],
            ],
            vec![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    fn query_points() -> Vec<Point<f64>> {
        (0..=12)
            .flat_map(|i| (0..=12).map(move |j| Point::unlabeled(vec![i as f64 * 0.5, j as f64 * 0.5])))
            .collect()
    }

    #[test]
    fn test_committee_fits_separable_data() {
        let data = create_separable_data();
        let config = CommitteeConfig::default()
            .with_n_members(5)
            .with_member(ClassifierConfig::ImaPrimal(ImaConfig::default()));
        let mut committee = PrimalCommittee::new(config);
        let report = Learner::<f64>::fit(&mut committee, &data).unwrap();

        assert_eq!(report.status, FitStatus::Converged);
        assert_eq!(committee.members().len(), 5);
        assert!(committee.members().iter().all(|(w, _)| (*w - 0.2).abs() < 1e-12));
        for p in data.iter() {
            assert_eq!(committee.predict(p).unwrap(), p.label().unwrap());
        }
    }

    #[test]
    fn test_single_member_matches_member() {
        let data = create_separable_data();
        let member = ClassifierConfig::ImaPrimal(ImaConfig::default());
        let config = CommitteeConfig::default()
            .with_n_members(1)
            .with_member(member.clone())
            .with_sampling(CommitteeSampling::Full);

        let mut committee = PrimalCommittee::new(config);
        Learner::<f64>::fit(&mut committee, &data).unwrap();

        let mut single = member.with_random_state(42).build::<f64>();
        single.fit(&data).unwrap();

        assert_eq!(&committee.members()[0].1, single.primal_model().unwrap());
        for p in query_points() {
            assert_eq!(committee.predict(&p).unwrap(), single.predict(&p).unwrap());
        }
    }

    #[test]
    fn test_even_split_predicts_positive() {
        let data = create_separable_data();
        let mut committee = PrimalCommittee::new(
            CommitteeConfig::default()
                .with_n_members(2)
                .with_sampling(CommitteeSampling::Full),
        );
        Learner::<f64>::fit(&mut committee, &data).unwrap();

        // force the two members to disagree everywhere
        let flipped = {
            let (w, m) = &committee.members[1];
            let mut m = m.clone();
            m.weights.mapv_inplace(|v| -v);
            m.bias = -m.bias;
            (*w, m)
        };
        committee.members[1] = flipped;

        let p = Point::unlabeled(vec![6.0, 6.0]);
        assert_eq!(committee.decision_function(&p).unwrap(), 0.0);
        assert_eq!(committee.predict(&p).unwrap(), 1.0);
    }

    #[test]
    fn test_weighted_vote() {
        let data = create_separable_data();
        let mut committee = PrimalCommittee::new(
            CommitteeConfig::default()
                .with_n_members(3)
                .with_sampling(CommitteeSampling::Full)
                .with_weights(vec![1.0, 0.0, 2.0]),
        );
        Learner::<f64>::fit(&mut committee, &data).unwrap();
        let weights: Vec<f64> = committee.members().iter().map(|(w, _)| *w).collect();
        assert_eq!(weights, vec![1.0, 0.0, 2.0]);

        let p = Point::unlabeled(vec![5.5, 5.5]);
        assert_eq!(committee.decision_function(&p).unwrap(), 3.0);
    }

    #[test]
    fn test_bootstrap_is_reproducible() {
        let data = create_separable_data();
        let member = ClassifierConfig::PerceptronPrimal(
            PerceptronConfig::default().with_pass_order(PassOrder::Shuffled),
        );
        let config = CommitteeConfig::default().with_n_members(4).with_member(member);

        let mut a = PrimalCommittee::new(config.clone());
        let mut b = PrimalCommittee::new(config);
        Learner::<f64>::fit(&mut a, &data).unwrap();
        Learner::<f64>::fit(&mut b, &data).unwrap();
        assert_eq!(a.members(), b.members());

        let restored = PrimalCommittee::from_json(&a.to_json().unwrap()).unwrap();
        assert_eq!(restored.members(), a.members());
    }

    #[test]
    fn test_bootstrap_keeps_class_sizes() {
        let y = vec![-1.0, 1.0, -1.0, -1.0, 1.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let indices = bootstrap_indices(&y, &mut rng);
        assert_eq!(indices.len(), 5);
        assert_eq!(indices.iter().filter(|&&i| y[i] < 0.0).count(), 3);
        assert_eq!(indices.iter().filter(|&&i| y[i] > 0.0).count(), 2);
    }

    #[test]
    fn test_invalid_configurations() {
        let data = create_separable_data();
        let invalid = [
            CommitteeConfig::default().with_n_members(0),
            CommitteeConfig::default().with_member(ClassifierConfig::Smo(Default::default())),
            CommitteeConfig::default().with_n_members(2).with_weights(vec![1.0]),
            CommitteeConfig::default().with_n_members(2).with_weights(vec![1.0, -1.0]),
            CommitteeConfig::default().with_n_members(2).with_weights(vec![0.0, 0.0]),
        ];
        for config in invalid {
            let mut committee = PrimalCommittee::new(config);
            assert!(matches!(
                Learner::<f64>::fit(&mut committee, &data),
                Err(MltkError::InvalidConfiguration { .. })
            ));
        }

        let committee = PrimalCommittee::default();
        assert!(matches!(
            Learner::<f64>::predict(&committee, &Point::unlabeled(vec![0.0, 0.0])),
            Err(MltkError::NotFitted)
        ));
    }
}
