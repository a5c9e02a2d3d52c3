//! Ensemble methods module
//!
//! Provides learners built from other learners:
//! - One-vs-all and one-vs-one multi-class composition
//! - Weighted committees of primal classifiers
//! - Random subspace and weighted ensembles of KNN classifiers

mod committee;
mod knn_ensemble;
mod multiclass;

pub use committee::{CommitteeConfig, CommitteeSampling, PrimalCommittee};
pub use knn_ensemble::{
    KnnBaggingConfig, KnnBaggingEnsemble, KnnSubspaceConfig, KnnSubspaceEnsemble, VotingStrategy,
    DEFAULT_METRICS,
};
pub use multiclass::{OneVsAll, OneVsOne};
