//! Learners and their training algorithms
//!
//! Provides:
//! - Perceptron classifiers, primal and dual, with or without a fixed margin
//! - Incremental Margin Algorithm (IMA) classifiers
//! - Sequential Minimal Optimization (SMO) support vector classifier
//! - K-Nearest Neighbors classification and regression
//! - LMS and kernel ε-insensitive regression
//! - K-Means clustering
//! - Serializable classifier selection and cross-validation

pub(crate) mod config;
pub(crate) mod models;
pub(crate) mod online;
pub mod clustering;
pub mod cross_validation;
pub mod ima;
pub mod knn;
pub mod perceptron;
pub mod regression;
pub mod smo;

pub use clustering::{EmptyClusterPolicy, KMeans, KMeansConfig, KMeansInit};
pub use config::{AnyClassifier, ClassifierConfig};
pub use cross_validation::{cross_validate, CVResults, CVSplit, CVStrategy, CrossValidator, Scoring};
pub use ima::{IMADual, IMAp, IMApFixedMargin, ImaConfig, ImaFixedMarginConfig};
pub use knn::{Distance, KnnClassifier, KnnConfig, KnnRegressor, Neighbor, WeightScheme};
pub use models::{
    Classifier, Clusterer, DualModel, FitReport, FitStatus, Learner, PrimalModel, Regressor,
    SUPPORT_EPS,
};
pub use online::{MarginNorm, PassOrder};
pub use perceptron::{
    FixedMarginConfig, PerceptronConfig, PerceptronDual, PerceptronFixedMarginDual,
    PerceptronFixedMarginPrimal, PerceptronPrimal,
};
pub use regression::{DualRegressor, DualRegressorConfig, LmsConfig, LmsPrimal};
pub use smo::{PartnerHeuristic, Smo, SmoConfig};
