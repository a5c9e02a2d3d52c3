//! Serializable classifier selection
//!
//! [`ClassifierConfig`] names an algorithm together with its options and is
//! the form a classifier takes in a JSON configuration file. [`build`]
//! turns it into an [`AnyClassifier`], which dispatches the learner traits
//! to the selected algorithm.
//!
//! [`build`]: ClassifierConfig::build

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ima::{IMADual, IMAp, IMApFixedMargin, ImaConfig, ImaFixedMarginConfig};
use super::knn::{KnnClassifier, KnnConfig};
use super::models::{Classifier, FitReport, Learner, PrimalModel};
use super::perceptron::{
    FixedMarginConfig, PerceptronConfig, PerceptronDual, PerceptronFixedMarginDual,
    PerceptronFixedMarginPrimal, PerceptronPrimal,
};
use super::smo::{Smo, SmoConfig};
use crate::dataset::{Data, Feature, Point};
use crate::error::Result;
use crate::kernel::Kernel;

/// Algorithm choice plus its options, tagged by `"algorithm"` in JSON:
///
/// ```json
/// { "algorithm": "smo", "c": 10.0, "kernel": { "type": "rbf", "gamma": 0.5 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClassifierConfig {
    PerceptronPrimal(PerceptronConfig),
    PerceptronFixedMarginPrimal(FixedMarginConfig),
    PerceptronDual(PerceptronConfig),
    PerceptronFixedMarginDual(FixedMarginConfig),
    ImaPrimal(ImaConfig),
    ImaFixedMarginPrimal(ImaFixedMarginConfig),
    ImaDual(ImaConfig),
    Smo(SmoConfig),
    Knn(KnnConfig),
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::PerceptronPrimal(PerceptronConfig::default())
    }
}

impl ClassifierConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the options of the selected algorithm
    pub fn validate(&self) -> Result<()> {
        match self {
            ClassifierConfig::PerceptronPrimal(c) => c.validate_primal(),
            ClassifierConfig::PerceptronDual(c) => c.validate(),
            ClassifierConfig::PerceptronFixedMarginPrimal(c) => {
                c.validate()?;
                c.perceptron.validate_primal()
            }
            ClassifierConfig::PerceptronFixedMarginDual(c) => c.validate(),
            ClassifierConfig::ImaPrimal(c) => c.validate_primal(),
            ClassifierConfig::ImaDual(c) => c.validate(),
            ClassifierConfig::ImaFixedMarginPrimal(c) => {
                c.validate()?;
                c.fixed.perceptron.validate_primal()
            }
            ClassifierConfig::Smo(c) => c.validate(),
            ClassifierConfig::Knn(c) => c.validate(),
        }
    }

    /// Algorithm tag as written in JSON
    pub fn algorithm(&self) -> &'static str {
        match self {
            ClassifierConfig::PerceptronPrimal(_) => "perceptron_primal",
            ClassifierConfig::PerceptronFixedMarginPrimal(_) => "perceptron_fixed_margin_primal",
            ClassifierConfig::PerceptronDual(_) => "perceptron_dual",
            ClassifierConfig::PerceptronFixedMarginDual(_) => "perceptron_fixed_margin_dual",
            ClassifierConfig::ImaPrimal(_) => "ima_primal",
            ClassifierConfig::ImaFixedMarginPrimal(_) => "ima_fixed_margin_primal",
            ClassifierConfig::ImaDual(_) => "ima_dual",
            ClassifierConfig::Smo(_) => "smo",
            ClassifierConfig::Knn(_) => "knn",
        }
    }

    /// Whether the algorithm learns an explicit weight vector
    pub fn is_primal(&self) -> bool {
        matches!(
            self,
            ClassifierConfig::PerceptronPrimal(_)
                | ClassifierConfig::PerceptronFixedMarginPrimal(_)
                | ClassifierConfig::ImaPrimal(_)
                | ClassifierConfig::ImaFixedMarginPrimal(_)
        )
    }

    /// Kernel the algorithm uses; KNN reports the linear kernel
    pub fn kernel(&self) -> Kernel {
        match self {
            ClassifierConfig::PerceptronPrimal(c) | ClassifierConfig::PerceptronDual(c) => c.kernel,
            ClassifierConfig::PerceptronFixedMarginPrimal(c)
            | ClassifierConfig::PerceptronFixedMarginDual(c) => c.perceptron.kernel,
            ClassifierConfig::ImaPrimal(c) | ClassifierConfig::ImaDual(c) => c.kernel,
            ClassifierConfig::ImaFixedMarginPrimal(c) => c.fixed.perceptron.kernel,
            ClassifierConfig::Smo(c) => c.kernel,
            ClassifierConfig::Knn(_) => Kernel::Linear,
        }
    }

    /// Copy of this configuration with its random seed replaced
    pub fn with_random_state(&self, seed: u64) -> Self {
        let mut config = self.clone();
        match &mut config {
            ClassifierConfig::PerceptronPrimal(c) | ClassifierConfig::PerceptronDual(c) => {
                c.random_state = Some(seed)
            }
            ClassifierConfig::PerceptronFixedMarginPrimal(c)
            | ClassifierConfig::PerceptronFixedMarginDual(c) => c.perceptron.random_state = Some(seed),
            ClassifierConfig::ImaPrimal(c) | ClassifierConfig::ImaDual(c) => c.random_state = Some(seed),
            ClassifierConfig::ImaFixedMarginPrimal(c) => c.fixed.perceptron.random_state = Some(seed),
            ClassifierConfig::Smo(c) => c.random_state = Some(seed),
            ClassifierConfig::Knn(_) => {}
        }
        config
    }

    /// Unfitted classifier for this configuration
    pub fn build<T: Feature>(&self) -> AnyClassifier<T> {
        match self.clone() {
            ClassifierConfig::PerceptronPrimal(c) => AnyClassifier::PerceptronPrimal(PerceptronPrimal::new(c)),
            ClassifierConfig::PerceptronFixedMarginPrimal(c) => {
                AnyClassifier::PerceptronFixedMarginPrimal(PerceptronFixedMarginPrimal::new(c))
            }
            ClassifierConfig::PerceptronDual(c) => AnyClassifier::PerceptronDual(PerceptronDual::new(c)),
            ClassifierConfig::PerceptronFixedMarginDual(c) => {
                AnyClassifier::PerceptronFixedMarginDual(PerceptronFixedMarginDual::new(c))
            }
            ClassifierConfig::ImaPrimal(c) => AnyClassifier::ImaPrimal(IMAp::new(c)),
            ClassifierConfig::ImaFixedMarginPrimal(c) => {
                AnyClassifier::ImaFixedMarginPrimal(IMApFixedMargin::new(c))
            }
            ClassifierConfig::ImaDual(c) => AnyClassifier::ImaDual(IMADual::new(c)),
            ClassifierConfig::Smo(c) => AnyClassifier::Smo(Smo::new(c)),
            ClassifierConfig::Knn(c) => AnyClassifier::Knn(KnnClassifier::new(c)),
        }
    }
}

/// A classifier of any supported algorithm
#[derive(Debug, Clone)]
pub enum AnyClassifier<T = f64> {
    PerceptronPrimal(PerceptronPrimal),
    PerceptronFixedMarginPrimal(PerceptronFixedMarginPrimal),
    PerceptronDual(PerceptronDual<T>),
    PerceptronFixedMarginDual(PerceptronFixedMarginDual<T>),
    ImaPrimal(IMAp),
    ImaFixedMarginPrimal(IMApFixedMargin),
    ImaDual(IMADual<T>),
    Smo(Smo<T>),
    Knn(KnnClassifier<T>),
}

macro_rules! dispatch {
    ($value:expr, $learner:ident => $body:expr) => {
        match $value {
            AnyClassifier::PerceptronPrimal($learner) => $body,
            AnyClassifier::PerceptronFixedMarginPrimal($learner) => $body,
            AnyClassifier::PerceptronDual($learner) => $body,
            AnyClassifier::PerceptronFixedMarginDual($learner) => $body,
            AnyClassifier::ImaPrimal($learner) => $body,
            AnyClassifier::ImaFixedMarginPrimal($learner) => $body,
            AnyClassifier::ImaDual($learner) => $body,
            AnyClassifier::Smo($learner) => $body,
            AnyClassifier::Knn($learner) => $body,
        }
    };
}

impl<T: Feature> AnyClassifier<T> {
    /// Fitted weight vector of a primal algorithm
    pub fn primal_model(&self) -> Option<&PrimalModel> {
        match self {
            AnyClassifier::PerceptronPrimal(m) => m.model(),
            AnyClassifier::PerceptronFixedMarginPrimal(m) => m.model(),
            AnyClassifier::ImaPrimal(m) => m.model(),
            AnyClassifier::ImaFixedMarginPrimal(m) => m.model(),
            _ => None,
        }
    }

    /// Training examples the fitted model depends on; empty for primal learners
    pub fn support_indices(&self) -> Vec<usize> {
        match self {
            AnyClassifier::PerceptronDual(m) => m.support_indices(),
            AnyClassifier::PerceptronFixedMarginDual(m) => m.support_indices(),
            AnyClassifier::ImaDual(m) => m.support_indices(),
            AnyClassifier::Smo(m) => m.support_indices(),
            _ => Vec::new(),
        }
    }
}

impl<T: Feature> Learner<T> for AnyClassifier<T> {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        dispatch!(self, m => Learner::<T>::fit(m, data))
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        dispatch!(self, m => Learner::<T>::predict(m, point))
    }

    fn is_fitted(&self) -> bool {
        dispatch!(self, m => Learner::<T>::is_fitted(m))
    }

    fn name(&self) -> &'static str {
        dispatch!(self, m => Learner::<T>::name(m))
    }

    fn predict_batch(&self, data: &Data<T>) -> Result<ndarray::Array1<f64>> {
        dispatch!(self, m => Learner::<T>::predict_batch(m, data))
    }
}

impl<T: Feature> Classifier<T> for AnyClassifier<T> {
    fn decision_function(&self, point: &Point<T>) -> Result<f64> {
        dispatch!(self, m => Classifier::<T>::decision_function(m, point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MltkError;
    use crate::training::models::FitStatus;

    fn four_points() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    fn all_configs() -> Vec<ClassifierConfig> {
        vec![
            ClassifierConfig::PerceptronPrimal(PerceptronConfig::default()),
            ClassifierConfig::PerceptronFixedMarginPrimal(FixedMarginConfig::default()),
            ClassifierConfig::PerceptronDual(PerceptronConfig::default()),
            ClassifierConfig::PerceptronFixedMarginDual(FixedMarginConfig::default()),
            ClassifierConfig::ImaPrimal(ImaConfig::default()),
            ClassifierConfig::ImaFixedMarginPrimal(ImaFixedMarginConfig::default()),
            ClassifierConfig::ImaDual(ImaConfig::default()),
            ClassifierConfig::Smo(SmoConfig::default()),
            ClassifierConfig::Knn(KnnConfig::default().with_k(1)),
        ]
    }

    #[test]
    fn test_every_algorithm_separates_four_points() {
        let data = four_points();
        for config in all_configs() {
            let mut clf: AnyClassifier = config.build();
            assert!(!clf.is_fitted());
            let report = clf.fit(&data).unwrap();
            assert_eq!(report.status, FitStatus::Converged, "{}", clf.name());
            assert_eq!(clf.predict(&Point::unlabeled(vec![5.5, 5.5])).unwrap(), 1.0);
            assert_eq!(clf.predict_batch(&data).unwrap(), data.targets().unwrap());
            assert_eq!(clf.primal_model().is_some(), config.is_primal());

            let tag = format!("\"algorithm\": \"{}\"", config.algorithm());
            assert!(config.to_json().unwrap().contains(&tag));
        }
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "algorithm": "smo",
            "c": 10.0,
            "kernel": { "type": "rbf", "gamma": 0.5 }
        }"#;
        let config = ClassifierConfig::from_json(json).unwrap();
        match &config {
            ClassifierConfig::Smo(c) => {
                assert_eq!(c.c, 10.0);
                assert_eq!(c.kernel, Kernel::Rbf { gamma: 0.5 });
                assert_eq!(c.max_iter, SmoConfig::default().max_iter);
            }
            other => panic!("unexpected config {:?}", other),
        }
        let clf: AnyClassifier = config.build();
        assert_eq!(Learner::<f64>::name(&clf), "smo");
    }

    #[test]
    fn test_json_round_trip_with_nested_options() {
        let config = ClassifierConfig::ImaFixedMarginPrimal(
            ImaFixedMarginConfig::default()
                .with_fixed(FixedMarginConfig::default().with_margin(0.5))
                .with_flexible(0.25),
        );
        let json = config.to_json().unwrap();
        assert!(json.contains("\"algorithm\": \"ima_fixed_margin_primal\""));
        assert_eq!(ClassifierConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = ClassifierConfig::from_json(r#"{"algorithm": "random_forest"}"#).unwrap_err();
        assert!(matches!(err, MltkError::Serialization(_)));
    }

    #[test]
    fn test_validate_and_seed() {
        let primal_rbf = ClassifierConfig::PerceptronPrimal(
            PerceptronConfig::default().with_kernel(Kernel::Rbf { gamma: 1.0 }),
        );
        assert!(primal_rbf.validate().is_err());
        assert_eq!(primal_rbf.kernel(), Kernel::Rbf { gamma: 1.0 });

        let seeded = ClassifierConfig::Smo(SmoConfig::default()).with_random_state(9);
        match seeded {
            ClassifierConfig::Smo(c) => assert_eq!(c.random_state, Some(9)),
            other => panic!("unexpected config {:?}", other),
        }
    }
}
