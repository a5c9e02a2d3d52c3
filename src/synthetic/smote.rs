//! SMOTE over-sampling of the minority class

use num_traits::AsPrimitive;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};

/// SMOTE (Synthetic Minority Over-sampling Technique).
///
/// Grows the class with the fewest points by `ratio * n` synthetic points.
/// Each one lies on the segment between a random minority point and one of
/// its `k_neighbors` nearest minority neighbors (Euclidean, duplicates of
/// the point itself excluded). Ties for the minority go to the lowest class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smote {
    /// Nearest minority neighbors considered per point
    pub k_neighbors: usize,
    /// Synthetic points to add, as a fraction of the input size
    pub ratio: f64,
    pub random_state: Option<u64>,
}

impl Default for Smote {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            ratio: 0.1,
            random_state: Some(42),
        }
    }
}

impl Smote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k;
        self
    }

    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_neighbors == 0 {
            return Err(MltkError::invalid_config(
                "k_neighbors",
                self.k_neighbors,
                "must be at least 1",
            ));
        }
        if !self.ratio.is_finite() || self.ratio <= 0.0 {
            return Err(MltkError::invalid_config(
                "ratio",
                self.ratio,
                "must be finite and positive",
            ));
        }
        Ok(())
    }

    /// Indices of the `k_neighbors` nearest rows of `rows[i]` at a positive distance
    fn neighbors_of(&self, rows: &[Vec<f64>], i: usize) -> Vec<usize> {
        let mut distances: Vec<(f64, usize)> = rows
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, row)| {
                let d: f64 = row
                    .iter()
                    .zip(&rows[i])
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (d, j)
            })
            .filter(|(d, _)| *d > 0.0)
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances
            .into_iter()
            .take(self.k_neighbors)
            .map(|(_, j)| j)
            .collect()
    }

    /// The input points followed by the synthetic minority points.
    ///
    /// Integer feature types receive interpolated values cast back with `as`.
    /// When the minority has no two distinct points the data is returned
    /// unchanged.
    pub fn resample<T>(&self, data: &Data<T>) -> Result<Data<T>>
    where
        T: Feature,
        f64: AsPrimitive<T>,
    {
        self.validate()?;
        data.ensure_non_empty()?;
        data.classes()?;

        let mut by_class: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &y) in data.targets()?.iter().enumerate() {
            by_class.entry(y.round() as i64).or_default().push(i);
        }
        let mut minority: Option<(i64, &Vec<usize>)> = None;
        for (&class, members) in &by_class {
            match minority {
                Some((_, best)) if members.len() >= best.len() => {}
                _ => minority = Some((class, members)),
            }
        }
        let (class, members) = minority.ok_or(MltkError::EmptyData)?;

        let n_synthetic = (self.ratio * data.len() as f64).round() as usize;
        let rows: Vec<Vec<f64>> = members
            .iter()
            .filter_map(|&i| data.get(i))
            .map(|p| p.values().collect())
            .collect();
        let neighbors: Vec<Vec<usize>> = (0..rows.len()).map(|i| self.neighbors_of(&rows, i)).collect();
        let seeds: Vec<usize> = (0..rows.len()).filter(|&i| !neighbors[i].is_empty()).collect();

        let mut points = data.points().to_vec();
        if n_synthetic == 0 || seeds.is_empty() {
            debug!(class, n_minority = rows.len(), "SMOTE found nothing to interpolate");
            return Data::new(points);
        }

        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let label = class as f64;
        for _ in 0..n_synthetic {
            let z = seeds[rng.gen_range(0..seeds.len())];
            let candidates = &neighbors[z];
            let neighbor = &rows[candidates[rng.gen_range(0..candidates.len())]];
            let gap: f64 = rng.gen();
            let x: Vec<T> = rows[z]
                .iter()
                .zip(neighbor)
                .map(|(&a, &b)| (a + gap * (b - a)).as_())
                .collect();
            points.push(Point::new(x, label));
        }

        debug!(
            class,
            n_minority = rows.len(),
            n_synthetic,
            "SMOTE over-sampled minority class"
        );
        Data::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20 majority points on a grid near the origin, 5 minority points near (10, 10)
    fn create_imbalanced_data() -> Data<f64> {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            rows.push(vec![(i % 5) as f64, (i / 5) as f64]);
            labels.push(0.0);
        }
        for i in 0..5 {
            rows.push(vec![10.0 + (i % 3) as f64, 10.0 + (i / 3) as f64]);
            labels.push(1.0);
        }
        Data::from_rows(rows, labels).unwrap()
    }

    #[test]
    fn test_smote_grows_minority() {
        let data = create_imbalanced_data();
        let smote = Smote::new().with_k_neighbors(3).with_ratio(0.4);
        let result = smote.resample(&data).unwrap();

        assert_eq!(result.len(), 35);
        for p in result.iter().skip(25) {
            assert_eq!(p.label(), Some(1.0));
            // inside the minority's bounding box
            assert!(p.values().all(|v| (10.0..=12.0).contains(&v)));
        }
    }

    #[test]
    fn test_smote_preserves_original() {
        let data = create_imbalanced_data();
        let result = Smote::new().resample(&data).unwrap();
        assert_eq!(result.len(), 25 + 3);
        assert_eq!(&result.points()[..25], data.points());
    }

    #[test]
    fn test_smote_is_seeded() {
        let data = create_imbalanced_data();
        let smote = Smote::new().with_ratio(0.5).with_random_state(9);
        assert_eq!(smote.resample(&data).unwrap(), smote.resample(&data).unwrap());
    }

    #[test]
    fn test_smote_without_distinct_minority_points() {
        let data = Data::from_rows(
            vec![vec![0.0], vec![1.0], vec![2.0], vec![5.0], vec![5.0]],
            vec![-1.0, -1.0, -1.0, 1.0, 1.0],
        )
        .unwrap();
        let result = Smote::new().with_ratio(1.0).resample(&data).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_smote_validation() {
        let data = create_imbalanced_data();
        assert!(matches!(
            Smote::new().with_k_neighbors(0).resample(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            Smote::new().with_ratio(-0.5).resample(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
    }
}
