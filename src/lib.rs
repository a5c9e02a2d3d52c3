//! mltk - margin classifiers, kernel learners and clustering
//!
//! This crate provides a family of learners over point-cloud datasets that
//! share one `fit`/`predict` contract and a pluggable similarity kernel:
//! - Perceptron, IMA and SMO margin classifiers, primal and dual
//! - K-Nearest Neighbors, LMS and kernel regression
//! - K-Means clustering
//! - Multi-class composition, weighted committees and KNN ensembles
//! - SMOTE over-sampling of a minority class
//! - Cross-validation over index subsets
//!
//! # Modules
//!
//! - [`dataset`] - Points and the datasets learners are fit on
//! - [`kernel`] - Similarity functions and feature maps
//! - [`training`] - Learners, configurations and cross-validation
//! - [`ensemble`] - Learners composed of other learners
//! - [`synthetic`] - Synthetic over-sampling before fitting
//!
//! # Example
//!
//! ```
//! use mltk::prelude::*;
//!
//! let data = Data::from_rows(
//!     vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
//!     vec![-1.0, -1.0, 1.0, 1.0],
//! )?
//! .shared();
//!
//! let mut clf = PerceptronDual::new(PerceptronConfig::default().with_max_epochs(10));
//! let report = clf.fit(&data)?;
//! assert!(report.is_converged());
//! assert_eq!(clf.predict(&Point::unlabeled(vec![5.5, 5.5]))?, 1.0);
//! # Ok::<(), mltk::MltkError>(())
//! ```

// Core error handling
pub mod error;

// Data and similarity
pub mod dataset;
pub mod kernel;

// Learners
pub mod training;
pub mod ensemble;
pub mod synthetic;

pub use error::{MltkError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{MltkError, Result};

    // Data
    pub use crate::dataset::{Data, Feature, Point};
    pub use crate::kernel::Kernel;

    // Learner contract
    pub use crate::training::{
        Classifier, Clusterer, DualModel, FitReport, FitStatus, Learner, PrimalModel, Regressor,
    };

    // Classifiers
    pub use crate::training::{
        AnyClassifier, ClassifierConfig, Distance, FixedMarginConfig, IMADual, IMAp,
        IMApFixedMargin, ImaConfig, ImaFixedMarginConfig, KnnClassifier, KnnConfig, PerceptronConfig,
        PerceptronDual, PerceptronFixedMarginDual, PerceptronFixedMarginPrimal, PerceptronPrimal,
        Smo, SmoConfig,
    };

    // Regressors and clustering
    pub use crate::training::{
        DualRegressor, DualRegressorConfig, KMeans, KMeansConfig, KnnRegressor, LmsConfig,
        LmsPrimal,
    };

    // Cross-validation
    pub use crate::training::{cross_validate, CVResults, CVStrategy, CrossValidator, Scoring};

    // Ensembles
    pub use crate::ensemble::{
        CommitteeConfig, KnnBaggingConfig, KnnBaggingEnsemble, KnnSubspaceConfig,
        KnnSubspaceEnsemble, OneVsAll, OneVsOne, PrimalCommittee, VotingStrategy,
    };

    // Over-sampling
    pub use crate::synthetic::Smote;
}
