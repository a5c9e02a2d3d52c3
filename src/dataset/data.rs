//! Indexed collection of points sharing one dimensionality

use ndarray::{Array1, Array2};
use std::sync::Arc;

use super::point::{Feature, Point};
use crate::error::{MltkError, Result};

/// Ordered collection of [`Point`]s.
///
/// Invariant: every point has the same dimensionality. Learners borrow a
/// dataset through an `Arc` handle; they never mutate it.
#[derive(Debug, Clone, PartialEq)]
pub struct Data<T = f64> {
    points: Vec<Point<T>>,
    dim: usize,
}

impl<T: Feature> Default for Data<T> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            dim: 0,
        }
    }
}

impl<T: Feature> Data<T> {
    /// Build a dataset, checking that all points share one dimensionality
    pub fn new(points: Vec<Point<T>>) -> Result<Self> {
        let dim = points.first().map(|p| p.dim()).unwrap_or(0);
        for p in &points {
            p.check_dim(dim)?;
        }
        Ok(Self { points, dim })
    }

    /// Build from a feature matrix (one row per point) and labels
    pub fn from_arrays(x: &Array2<T>, y: &Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MltkError::DimensionMismatch {
                expected: x.nrows(),
                actual: y.len(),
            });
        }
        let points = x
            .rows()
            .into_iter()
            .zip(y.iter())
            .map(|(row, &label)| Point::from_array(row.to_owned(), Some(label)))
            .collect();
        Ok(Self {
            points,
            dim: x.ncols(),
        })
    }

    /// Build from plain rows and labels
    pub fn from_rows(rows: Vec<Vec<T>>, labels: Vec<f64>) -> Result<Self> {
        if rows.len() != labels.len() {
            return Err(MltkError::DimensionMismatch {
                expected: rows.len(),
                actual: labels.len(),
            });
        }
        Self::new(
            rows.into_iter()
                .zip(labels)
                .map(|(x, y)| Point::new(x, y))
                .collect(),
        )
    }

    pub fn push(&mut self, point: Point<T>) -> Result<()> {
        if self.points.is_empty() {
            self.dim = point.dim();
        } else {
            point.check_dim(self.dim)?;
        }
        self.points.push(point);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Dimensionality shared by all points
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, index: usize) -> Option<&Point<T>> {
        self.points.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point<T>> {
        self.points.iter()
    }

    pub fn points(&self) -> &[Point<T>] {
        &self.points
    }

    /// Labels/targets of every point; fails if any point is unlabeled
    pub fn targets(&self) -> Result<Array1<f64>> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.label()
                    .ok_or_else(|| MltkError::InvalidLabels(format!("point {} has no label", i)))
            })
            .collect::<Result<Vec<f64>>>()
            .map(Array1::from_vec)
    }

    /// Feature matrix widened to `f64` (n_points × dim)
    pub fn matrix(&self) -> Array2<f64> {
        let mut x = Array2::zeros((self.len(), self.dim));
        for (i, p) in self.points.iter().enumerate() {
            for (j, v) in p.values().enumerate() {
                x[[i, j]] = v;
            }
        }
        x
    }

    /// Sorted distinct class labels; labels must be integral
    pub fn classes(&self) -> Result<Vec<i64>> {
        let targets = self.targets()?;
        for (i, &v) in targets.iter().enumerate() {
            if (v - v.round()).abs() > 1e-9 {
                return Err(MltkError::InvalidLabels(format!(
                    "class labels must be integral, but point {} has label {}",
                    i, v
                )));
            }
        }
        let mut classes: Vec<i64> = targets.iter().map(|&v| v.round() as i64).collect();
        classes.sort_unstable();
        classes.dedup();
        Ok(classes)
    }

    /// New dataset made of the points at `indices` (repeats allowed)
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let points = indices
            .iter()
            .map(|&i| {
                self.points.get(i).cloned().ok_or(MltkError::IndexOutOfBounds {
                    index: i,
                    len: self.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            points,
            dim: self.dim,
        })
    }

    /// New dataset keeping only the feature columns at `features`
    pub fn select_features(&self, features: &[usize]) -> Result<Self> {
        let points = self
            .points
            .iter()
            .map(|p| p.select_features(features))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            points,
            dim: features.len(),
        })
    }

    /// New dataset with every label mapped through `f`; unlabeled points stay unlabeled
    pub fn relabel<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        let points = self
            .points
            .iter()
            .map(|p| match p.label() {
                Some(y) => p.with_label(f(y)),
                None => p.clone(),
            })
            .collect();
        Self {
            points,
            dim: self.dim,
        }
    }

    /// Wrap into the shared handle learners are fit on
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn ensure_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(MltkError::EmptyData);
        }
        Ok(())
    }
}

impl<'a, T> IntoIterator for &'a Data<T> {
    type Item = &'a Point<T>;
    type IntoIter = std::slice::Iter<'a, Point<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Data<f64> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_mixed_dimensions() {
        let result = Data::new(vec![
            Point::new(vec![1.0, 2.0], 1.0),
            Point::new(vec![1.0], -1.0),
        ]);
        assert!(matches!(
            result,
            Err(MltkError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_from_arrays() {
        let x = array![[1u8, 2], [3, 4], [5, 6]];
        let y = array![0.0, 1.0, 2.0];
        let data = Data::from_arrays(&x, &y).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.dim(), 2);
        assert_eq!(data.matrix(), array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(data.classes().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_select_and_bounds() {
        let data = sample();
        let subset = data.select(&[3, 0, 3]).unwrap();
        assert_eq!(subset.len(), 3);
        assert_eq!(subset.targets().unwrap(), array![1.0, -1.0, 1.0]);

        assert!(matches!(
            data.select(&[4]),
            Err(MltkError::IndexOutOfBounds { index: 4, len: 4 })
        ));
    }

    #[test]
    fn test_select_features() {
        let data = Data::from_rows(
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            vec![0.0, 1.0],
        )
        .unwrap();
        let narrow = data.select_features(&[2, 0]).unwrap();
        assert_eq!(narrow.dim(), 2);
        assert_eq!(narrow.matrix(), array![[3.0, 1.0], [6.0, 4.0]]);
        assert_eq!(narrow.targets().unwrap(), array![0.0, 1.0]);

        assert!(matches!(
            data.select_features(&[3]),
            Err(MltkError::IndexOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_targets_requires_labels() {
        let mut data = sample();
        data.push(Point::unlabeled(vec![2.0, 2.0])).unwrap();
        assert!(matches!(data.targets(), Err(MltkError::InvalidLabels(_))));
    }

    #[test]
    fn test_classes_rejects_fractional_labels() {
        let data = Data::from_rows(vec![vec![0.0], vec![1.0]], vec![0.5, 1.0]).unwrap();
        assert!(data.classes().is_err());
    }

    #[test]
    fn test_relabel() {
        let data = sample().relabel(|y| if y > 0.0 { 1.0 } else { 0.0 });
        assert_eq!(data.targets().unwrap(), array![0.0, 0.0, 1.0, 1.0]);
    }
}
