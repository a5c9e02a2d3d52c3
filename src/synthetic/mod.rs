//! Synthetic data generation
//!
//! Over-sampling of under-represented classes before fitting.

mod smote;

pub use smote::Smote;
