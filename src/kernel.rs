//! Kernel functions
//!
//! A [`Kernel`] scores the similarity of two feature vectors. Dual learners
//! evaluate it for every pair of training points (usually through a cached
//! Gram matrix); primal learners use it only through an explicit feature map.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};

/// Maximum number of samples for eager Gram matrix computation.
/// Beyond this, training returns an error to prevent OOM.
pub const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Highest polynomial degree accepted by [`Kernel::validate`]
const MAX_POLYNOMIAL_DEGREE: u32 = 32;

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kernel {
    /// Linear kernel: K(x, y) = x · y
    Linear,
    /// Polynomial kernel: K(x, y) = (γ * x · y + r)^d
    Polynomial { degree: u32, gamma: f64, coef0: f64 },
    /// Radial Basis Function (Gaussian): K(x, y) = exp(-γ * ||x - y||²)
    Rbf { gamma: f64 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Linear
    }
}

impl Kernel {
    /// Check kernel parameters.
    ///
    /// Polynomial kernels need `degree ≥ 1`, `gamma > 0` and `coef0 ≥ 0`, which
    /// keeps `k(x, x) ≥ 0`. RBF needs `gamma > 0`.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Kernel::Linear => Ok(()),
            Kernel::Polynomial {
                degree,
                gamma,
                coef0,
            } => {
                if degree == 0 || degree > MAX_POLYNOMIAL_DEGREE {
                    return Err(MltkError::invalid_config(
                        "kernel.degree",
                        degree,
                        format!("must be in 1..={}", MAX_POLYNOMIAL_DEGREE),
                    ));
                }
                if gamma <= 0.0 || !gamma.is_finite() {
                    return Err(MltkError::invalid_config(
                        "kernel.gamma",
                        gamma,
                        "must be positive and finite",
                    ));
                }
                if coef0 < 0.0 || !coef0.is_finite() {
                    return Err(MltkError::invalid_config(
                        "kernel.coef0",
                        coef0,
                        "must be non-negative and finite",
                    ));
                }
                Ok(())
            }
            Kernel::Rbf { gamma } => {
                if gamma <= 0.0 || !gamma.is_finite() {
                    return Err(MltkError::invalid_config(
                        "kernel.gamma",
                        gamma,
                        "must be positive and finite",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Kernel::Linear)
    }

    /// Evaluate the kernel on two points of equal dimensionality
    pub fn evaluate<T: Feature>(&self, a: &Point<T>, b: &Point<T>) -> Result<f64> {
        b.check_dim(a.dim())?;
        Ok(self.apply(a.values(), b.values()))
    }

    /// Distance implied by the kernel: `sqrt(k(a,a) + k(b,b) - 2k(a,b))`
    pub fn distance<T: Feature>(&self, a: &Point<T>, b: &Point<T>) -> Result<f64> {
        b.check_dim(a.dim())?;
        let aa = self.apply(a.values(), a.values());
        let bb = self.apply(b.values(), b.values());
        let ab = self.apply(a.values(), b.values());
        Ok((aa + bb - 2.0 * ab).max(0.0).sqrt())
    }

    /// Squared kernel distance between a point and a vector in input space
    pub(crate) fn squared_distance_to<T: Feature>(
        &self,
        a: &Point<T>,
        c: ArrayView1<f64>,
    ) -> Result<f64> {
        a.check_dim(c.len())?;
        let c_iter = || c.iter().copied();
        let aa = self.apply(a.values(), a.values());
        let cc = self.apply(c_iter(), c_iter());
        let ac = self.apply(a.values(), c_iter());
        Ok((aa + cc - 2.0 * ac).max(0.0))
    }

    fn apply<A, B>(&self, a: A, b: B) -> f64
    where
        A: Iterator<Item = f64>,
        B: Iterator<Item = f64>,
    {
        match *self {
            Kernel::Linear => a.zip(b).map(|(x, y)| x * y).sum(),
            Kernel::Polynomial {
                degree,
                gamma,
                coef0,
            } => {
                let dot: f64 = a.zip(b).map(|(x, y)| x * y).sum();
                (gamma * dot + coef0).powi(degree.min(i32::MAX as u32) as i32)
            }
            Kernel::Rbf { gamma } => {
                let norm_sq: f64 = a.zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * norm_sq).exp()
            }
        }
    }

    /// Compute the Gram matrix of a dataset (parallelized for large datasets)
    pub fn gram_matrix<T: Feature>(&self, data: &Data<T>) -> Result<Array2<f64>> {
        let n = data.len();
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(MltkError::invalid_config(
                "n_samples",
                n,
                format!(
                    "exceeds the maximum {} for an eager kernel matrix; subsample or use a primal learner",
                    MAX_KERNEL_MATRIX_SAMPLES
                ),
            ));
        }

        let points = data.points();
        let mut k = Array2::zeros((n, n));

        // For small matrices, sequential is faster due to overhead
        if n < 100 {
            for i in 0..n {
                for j in i..n {
                    let val = self.apply(points[i].values(), points[j].values());
                    k[[i, j]] = val;
                    k[[j, i]] = val;
                }
            }
            return Ok(k);
        }

        // Parallel: compute upper triangle rows in parallel
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (i..n)
                    .map(|j| self.apply(points[i].values(), points[j].values()))
                    .collect()
            })
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            for (offset, val) in row.into_iter().enumerate() {
                let j = i + offset;
                k[[i, j]] = val;
                k[[j, i]] = val;
            }
        }
        Ok(k)
    }

    /// Whether primal learners can train with this kernel
    pub fn has_feature_map(&self) -> bool {
        match *self {
            Kernel::Linear => true,
            Kernel::Polynomial { degree, .. } => degree <= 2,
            Kernel::Rbf { .. } => false,
        }
    }

    /// Dimensionality of the explicit feature space for inputs of size `dim`
    pub fn feature_dim(&self, dim: usize) -> Result<usize> {
        match *self {
            Kernel::Linear => Ok(dim),
            Kernel::Polynomial { degree: 1, .. } => Ok(dim + 1),
            Kernel::Polynomial { degree: 2, .. } => Ok(dim + dim * dim.saturating_sub(1) / 2 + dim + 1),
            _ => Err(self.no_feature_map()),
        }
    }

    /// Explicit feature map φ with `φ(a)·φ(b) == k(a, b)`.
    ///
    /// Defined for the linear kernel (identity) and polynomial kernels of
    /// degree 1 or 2.
    pub fn feature_map<T: Feature>(&self, x: &Point<T>) -> Result<Array1<f64>> {
        match *self {
            Kernel::Linear => Ok(x.to_f64()),
            Kernel::Polynomial {
                degree: 1,
                gamma,
                coef0,
            } => {
                let scale = gamma.sqrt();
                let mut phi: Vec<f64> = x.values().map(|v| scale * v).collect();
                phi.push(coef0.sqrt());
                Ok(Array1::from_vec(phi))
            }
            Kernel::Polynomial {
                degree: 2,
                gamma,
                coef0,
            } => {
                let v = x.to_f64();
                let d = v.len();
                let mut phi = Vec::with_capacity(self.feature_dim(d)?);
                phi.extend(v.iter().map(|&xi| gamma * xi * xi));
                let cross = gamma * std::f64::consts::SQRT_2;
                for i in 0..d {
                    for j in (i + 1)..d {
                        phi.push(cross * v[i] * v[j]);
                    }
                }
                let linear = (2.0 * gamma * coef0).sqrt();
                phi.extend(v.iter().map(|&xi| linear * xi));
                phi.push(coef0);
                Ok(Array1::from_vec(phi))
            }
            _ => Err(self.no_feature_map()),
        }
    }

    fn no_feature_map(&self) -> MltkError {
        MltkError::invalid_config(
            "kernel",
            format!("{:?}", self),
            "primal learners support only the linear kernel and polynomial kernels of degree 1 or 2",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<Point<f64>> {
        vec![
            Point::unlabeled(vec![1.0, 2.0, -1.0]),
            Point::unlabeled(vec![0.5, -3.0, 2.0]),
            Point::unlabeled(vec![0.0, 0.0, 0.0]),
        ]
    }

    fn kernels() -> Vec<Kernel> {
        vec![
            Kernel::Linear,
            Kernel::Polynomial {
                degree: 2,
                gamma: 0.5,
                coef0: 1.0,
            },
            Kernel::Polynomial {
                degree: 3,
                gamma: 1.0,
                coef0: 0.0,
            },
            Kernel::Rbf { gamma: 0.25 },
        ]
    }

    #[test]
    fn test_linear_kernel() {
        let a = Point::unlabeled(vec![1.0, 2.0]);
        let b = Point::unlabeled(vec![3.0, 4.0]);
        assert_eq!(Kernel::Linear.evaluate(&a, &b).unwrap(), 11.0);
    }

    #[test]
    fn test_rbf_kernel() {
        let a = Point::unlabeled(vec![0.0, 0.0]);
        let b = Point::unlabeled(vec![1.0, 1.0]);
        let k = Kernel::Rbf { gamma: 0.5 };
        assert!((k.evaluate(&a, &a).unwrap() - 1.0).abs() < 1e-12);
        assert!((k.evaluate(&a, &b).unwrap() - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_symmetry_and_non_negative_self_similarity() {
        let points = sample_points();
        for kernel in kernels() {
            for a in &points {
                assert!(kernel.evaluate(a, a).unwrap() >= 0.0);
                for b in &points {
                    let ab = kernel.evaluate(a, b).unwrap();
                    let ba = kernel.evaluate(b, a).unwrap();
                    assert!((ab - ba).abs() < 1e-12, "{:?} not symmetric", kernel);
                }
            }
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Point::unlabeled(vec![1.0, 2.0]);
        let b = Point::unlabeled(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            Kernel::Linear.evaluate(&a, &b),
            Err(MltkError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_gram_matrix() {
        let data = Data::new(sample_points()).unwrap();
        let kernel = Kernel::Polynomial {
            degree: 2,
            gamma: 1.0,
            coef0: 1.0,
        };
        let gram = kernel.gram_matrix(&data).unwrap();
        assert_eq!(gram.dim(), (3, 3));
        for i in 0..3 {
            assert!(gram[[i, i]] >= 0.0);
            for j in 0..3 {
                assert_eq!(gram[[i, j]], gram[[j, i]]);
            }
        }
        assert_eq!(gram[[2, 2]], 1.0);
    }

    #[test]
    fn test_parallel_gram_matrix_matches_direct_evaluation() {
        let points: Vec<Point<f64>> = (0..120)
            .map(|i| Point::unlabeled(vec![(i % 7) as f64, (i % 5) as f64 * 0.5]))
            .collect();
        let data = Data::new(points).unwrap();
        let kernel = Kernel::Rbf { gamma: 0.1 };
        let gram = kernel.gram_matrix(&data).unwrap();
        for (i, j) in [(0, 119), (57, 3), (100, 100)] {
            let direct = kernel.evaluate(&data.points()[i], &data.points()[j]).unwrap();
            assert!((gram[[i, j]] - direct).abs() < 1e-12);
        }
    }

    #[test]
    fn test_feature_map_reproduces_kernel() {
        let points = sample_points();
        for kernel in [
            Kernel::Linear,
            Kernel::Polynomial {
                degree: 1,
                gamma: 2.0,
                coef0: 0.5,
            },
            Kernel::Polynomial {
                degree: 2,
                gamma: 0.5,
                coef0: 1.5,
            },
        ] {
            for a in &points {
                let phi_a = kernel.feature_map(a).unwrap();
                assert_eq!(phi_a.len(), kernel.feature_dim(3).unwrap());
                for b in &points {
                    let phi_b = kernel.feature_map(b).unwrap();
                    let expected = kernel.evaluate(a, b).unwrap();
                    assert!((phi_a.dot(&phi_b) - expected).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_feature_map_unavailable_for_rbf() {
        let kernel = Kernel::Rbf { gamma: 1.0 };
        assert!(!kernel.has_feature_map());
        assert!(matches!(
            kernel.feature_map(&Point::unlabeled(vec![1.0])),
            Err(MltkError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_kernel_distance() {
        let a = Point::unlabeled(vec![0.0, 0.0]);
        let b = Point::unlabeled(vec![3.0, 4.0]);
        assert!((Kernel::Linear.distance(&a, &b).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(Kernel::Linear.validate().is_ok());
        assert!(Kernel::Rbf { gamma: 0.0 }.validate().is_err());
        assert!(Kernel::Polynomial {
            degree: 0,
            gamma: 1.0,
            coef0: 0.0
        }
        .validate()
        .is_err());
        assert!(Kernel::Polynomial {
            degree: 2,
            gamma: 1.0,
            coef0: -1.0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_serde_tagged() {
        let json = r#"{"type":"rbf","gamma":0.5}"#;
        let kernel: Kernel = serde_json::from_str(json).unwrap();
        assert_eq!(kernel, Kernel::Rbf { gamma: 0.5 });
    }
}
