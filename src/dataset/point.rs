//! Feature vectors with an optional label or regression target

use ndarray::{Array1, ArrayView1};
use num_traits::AsPrimitive;
use std::fmt::Debug;

use crate::error::{MltkError, Result};

/// Numeric component type a [`Point`] can hold.
///
/// Any primitive numeric type qualifies; model arithmetic widens every
/// component to `f64`.
pub trait Feature: Copy + Debug + Send + Sync + AsPrimitive<f64> + 'static {}

impl<T> Feature for T where T: Copy + Debug + Send + Sync + AsPrimitive<f64> + 'static {}

/// A fixed-length feature vector with an optional label/target.
///
/// Points are immutable once built; derive a new point with
/// [`Point::with_label`] instead of mutating one.
#[derive(Debug, Clone, PartialEq)]
pub struct Point<T = f64> {
    x: Array1<T>,
    y: Option<f64>,
}

impl<T: Feature> Point<T> {
    /// Create a labeled point
    pub fn new(x: Vec<T>, y: f64) -> Self {
        Self {
            x: Array1::from_vec(x),
            y: Some(y),
        }
    }

    /// Create a point without label (prediction queries, clustering input)
    pub fn unlabeled(x: Vec<T>) -> Self {
        Self {
            x: Array1::from_vec(x),
            y: None,
        }
    }

    pub fn from_array(x: Array1<T>, y: Option<f64>) -> Self {
        Self { x, y }
    }

    /// Return a copy of this point carrying `y` as label
    pub fn with_label(&self, y: f64) -> Self {
        Self {
            x: self.x.clone(),
            y: Some(y),
        }
    }

    /// Number of components
    pub fn dim(&self) -> usize {
        self.x.len()
    }

    pub fn features(&self) -> ArrayView1<'_, T> {
        self.x.view()
    }

    /// Component `i` widened to `f64`
    pub fn value(&self, i: usize) -> Option<f64> {
        self.x.get(i).map(|v| v.as_())
    }

    pub fn label(&self) -> Option<f64> {
        self.y
    }

    /// Iterate over the components as `f64`
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.x.iter().map(|v| v.as_())
    }

    pub fn to_f64(&self) -> Array1<f64> {
        self.x.mapv(|v| v.as_())
    }

    /// Point made of the components at `features`, in that order, keeping the label
    pub fn select_features(&self, features: &[usize]) -> Result<Self> {
        let x = features
            .iter()
            .map(|&j| {
                self.x.get(j).copied().ok_or(MltkError::IndexOutOfBounds {
                    index: j,
                    len: self.dim(),
                })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(Self {
            x: Array1::from_vec(x),
            y: self.y,
        })
    }

    /// Dot product with a weight vector of the same dimensionality
    pub fn dot(&self, w: &Array1<f64>) -> Result<f64> {
        self.check_dim(w.len())?;
        Ok(self.values().zip(w.iter()).map(|(a, b)| a * b).sum())
    }

    pub(crate) fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() != expected {
            return Err(MltkError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }
}
