//! K-Means clustering
//!
//! Lloyd iterations with distances measured through a [`Kernel`]. The
//! default linear kernel gives plain squared Euclidean distance. Centroids
//! are means in input space.

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

use super::models::{log_fit, Clusterer, FitReport, Learner};
use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::kernel::Kernel;

/// How initial centroids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KMeansInit {
    /// The first k distinct points in dataset order
    #[default]
    FirstDistinct,
    /// k distinct points drawn uniformly
    Random,
    /// k-means++: spread out, drawn proportional to squared distance
    KMeansPlusPlus,
}

/// What to do with a cluster that ends an assignment step empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyClusterPolicy {
    /// Move the centroid onto the point farthest from its own centroid
    #[default]
    FarthestPoint,
    /// Move the centroid onto a random point
    RandomPoint,
}

/// K-Means configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansConfig {
    pub k: usize,
    /// Maximum number of centroid updates
    pub max_iter: usize,
    pub init: KMeansInit,
    pub empty_cluster: EmptyClusterPolicy,
    pub kernel: Kernel,
    pub random_state: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 3,
            max_iter: 300,
            init: KMeansInit::FirstDistinct,
            empty_cluster: EmptyClusterPolicy::FarthestPoint,
            kernel: Kernel::Linear,
            random_state: Some(42),
        }
    }
}

impl KMeansConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_init(mut self, init: KMeansInit) -> Self {
        self.init = init;
        self
    }

    pub fn with_empty_cluster(mut self, policy: EmptyClusterPolicy) -> Self {
        self.empty_cluster = policy;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(MltkError::invalid_config("k", self.k, "must be at least 1"));
        }
        if self.max_iter == 0 {
            return Err(MltkError::invalid_config(
                "max_iter",
                self.max_iter,
                "must be at least 1",
            ));
        }
        self.kernel.validate()
    }
}

/// K-Means clustering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    config: KMeansConfig,
    /// Fitted cluster centroids (k × n_features)
    centroids: Option<Array2<f64>>,
    /// Cluster index of every training point
    assignments: Option<Vec<usize>>,
    /// Within-cluster sum of squared distances after every assignment step
    inertia_history: Vec<f64>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(KMeansConfig::default())
    }
}

impl KMeans {
    pub fn new(config: KMeansConfig) -> Self {
        Self {
            config,
            centroids: None,
            assignments: None,
            inertia_history: Vec::new(),
        }
    }

    /// Create with default config and `k` clusters
    pub fn with_k(k: usize) -> Self {
        Self::new(KMeansConfig::default().with_k(k))
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    /// Final within-cluster sum of squared distances
    pub fn inertia(&self) -> Option<f64> {
        self.centroids.as_ref()?;
        self.inertia_history.last().copied()
    }

    pub fn inertia_history(&self) -> &[f64] {
        &self.inertia_history
    }

    pub fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Cluster index of every point in `data`
    pub fn assign<T: Feature>(&self, data: &Data<T>) -> Result<Vec<usize>> {
        let centroids = self.centroids.as_ref().ok_or(MltkError::NotFitted)?;
        Ok(assign(data, centroids, &self.config.kernel)?
            .into_iter()
            .map(|(c, _)| c)
            .collect())
    }
}

impl<T: Feature> Learner<T> for KMeans {
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.centroids = None;
        self.assignments = None;
        self.inertia_history.clear();
        self.config.validate()?;
        data.ensure_non_empty()?;

        let k = self.config.k;
        let distinct = first_distinct(data);
        if distinct.len() < k {
            return Err(MltkError::invalid_config(
                "k",
                k,
                format!("exceeds the number of distinct points ({})", distinct.len()),
            ));
        }
        debug!(
            algorithm = "kmeans",
            n_samples = data.len(),
            dim = data.dim(),
            k,
            init = ?self.config.init,
            "Fitting"
        );

        let kernel = self.config.kernel;
        let mut rng = match self.config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut centroids = self.init_centroids(data, &distinct, &mut rng)?;

        let mut nearest = assign(data, &centroids, &kernel)?;
        let mut history = vec![inertia_of(&nearest)];
        let mut report = FitReport::exhausted(self.config.max_iter, 0);
        let mut updates = 0;

        for iter in 1..=self.config.max_iter {
            centroids = self.update_centroids(data, &nearest, &mut rng);
            let next = assign(data, &centroids, &kernel)?;
            history.push(inertia_of(&next));

            let changed = next
                .iter()
                .zip(nearest.iter())
                .filter(|(a, b)| a.0 != b.0)
                .count();
            trace!(iter, changed, inertia = history[history.len() - 1], "KMeans step");
            nearest = next;
            if changed == 0 {
                report = FitReport::converged(iter, updates);
                break;
            }
            updates += changed;
            report.updates = updates;
        }
        log_fit("kmeans", &report);

        self.centroids = Some(centroids);
        self.assignments = Some(nearest.into_iter().map(|(c, _)| c).collect());
        self.inertia_history = history;
        Ok(report)
    }

    /// Index of the nearest centroid; ties go to the lower index
    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let centroids = self.centroids.as_ref().ok_or(MltkError::NotFitted)?;
        nearest_centroid(point, centroids, &self.config.kernel).map(|(c, _)| c as f64)
    }

    fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn predict_batch(&self, data: &Data<T>) -> Result<Array1<f64>> {
        let labels = self.assign(data)?;
        Ok(labels.into_iter().map(|c| c as f64).collect())
    }
}

impl<T: Feature> Clusterer<T> for KMeans {
    fn centroids(&self) -> Option<&Array2<f64>> {
        self.centroids.as_ref()
    }

    fn assignments(&self) -> Option<&[usize]> {
        self.assignments.as_deref()
    }
}

impl KMeans {
    fn init_centroids<T: Feature>(
        &self,
        data: &Data<T>,
        distinct: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Result<Array2<f64>> {
        let k = self.config.k;
        let chosen: Vec<usize> = match self.config.init {
            KMeansInit::FirstDistinct => distinct[..k].to_vec(),
            KMeansInit::Random => distinct.choose_multiple(rng, k).copied().collect(),
            KMeansInit::KMeansPlusPlus => kmeans_pp_indices(data, distinct, k, &self.config.kernel, rng)?,
        };
        Ok(rows_of(data, &chosen))
    }

    /// Means of the assigned points; empty clusters are reseeded per policy
    fn update_centroids<T: Feature>(
        &self,
        data: &Data<T>,
        nearest: &[(usize, f64)],
        rng: &mut ChaCha8Rng,
    ) -> Array2<f64> {
        let k = self.config.k;
        let mut sums = Array2::<f64>::zeros((k, data.dim()));
        let mut counts = vec![0usize; k];
        for (p, &(c, _)) in data.iter().zip(nearest) {
            counts[c] += 1;
            for (j, v) in p.values().enumerate() {
                sums[[c, j]] += v;
            }
        }

        let mut used = vec![false; data.len()];
        for c in 0..k {
            if counts[c] > 0 {
                let n = counts[c] as f64;
                sums.row_mut(c).mapv_inplace(|v| v / n);
                continue;
            }
            let idx = match self.config.empty_cluster {
                EmptyClusterPolicy::FarthestPoint => farthest_unused(nearest, &used),
                EmptyClusterPolicy::RandomPoint => rng.gen_range(0..data.len()),
            };
            used[idx] = true;
            debug!(cluster = c, point = idx, "Reseeding empty cluster");
            for (j, v) in data.points()[idx].values().enumerate() {
                sums[[c, j]] = v;
            }
        }
        sums
    }
}

/// Nearest centroid of every point with its squared distance (parallel)
fn assign<T: Feature>(
    data: &Data<T>,
    centroids: &Array2<f64>,
    kernel: &Kernel,
) -> Result<Vec<(usize, f64)>> {
    data.points()
        .par_iter()
        .map(|p| nearest_centroid(p, centroids, kernel))
        .collect()
}

fn nearest_centroid<T: Feature>(
    point: &Point<T>,
    centroids: &Array2<f64>,
    kernel: &Kernel,
) -> Result<(usize, f64)> {
    let mut best = (0, f64::INFINITY);
    for (c, row) in centroids.rows().into_iter().enumerate() {
        let d = kernel.squared_distance_to(point, row)?;
        if d < best.1 {
            best = (c, d);
        }
    }
    Ok(best)
}

fn inertia_of(nearest: &[(usize, f64)]) -> f64 {
    nearest.iter().map(|&(_, d)| d).sum()
}

/// Point farthest from its centroid that has not been used for reseeding yet
fn farthest_unused(nearest: &[(usize, f64)], used: &[bool]) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, &(_, d)) in nearest.iter().enumerate() {
        if used[i] {
            continue;
        }
        if best.map_or(true, |(_, bd)| d > bd) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

/// k-means++ seeding: first centroid uniform over distinct points, then
/// each next one drawn with probability proportional to D²
fn kmeans_pp_indices<T: Feature>(
    data: &Data<T>,
    distinct: &[usize],
    k: usize,
    kernel: &Kernel,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    let points = data.points();
    let mut chosen = vec![distinct[rng.gen_range(0..distinct.len())]];
    let mut dists: Vec<f64> = points
        .iter()
        .map(|p| kernel.distance(p, &points[chosen[0]]).map(|d| d * d))
        .collect::<Result<_>>()?;

    while chosen.len() < k {
        let total: f64 = dists.iter().sum();
        let next = if total > 0.0 {
            let r = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = None;
            for (i, &d) in dists.iter().enumerate() {
                cumulative += d;
                if d > 0.0 && cumulative >= r {
                    pick = Some(i);
                    break;
                }
            }
            // Rounding can leave r just above the final cumulative sum
            pick.or_else(|| dists.iter().rposition(|&d| d > 0.0))
        } else {
            None
        };
        let next = match next {
            Some(i) => i,
            None => match distinct.iter().find(|&&i| !chosen.contains(&i)) {
                Some(&i) => i,
                None => break,
            },
        };
        chosen.push(next);
        for (i, p) in points.iter().enumerate() {
            let d = kernel.distance(p, &points[next])?;
            dists[i] = dists[i].min(d * d);
        }
    }
    Ok(chosen)
}

fn rows_of<T: Feature>(data: &Data<T>, indices: &[usize]) -> Array2<f64> {
    let mut rows = Array2::zeros((indices.len(), data.dim()));
    for (r, &i) in indices.iter().enumerate() {
        for (j, v) in data.points()[i].values().enumerate() {
            rows[[r, j]] = v;
        }
    }
    rows
}

/// Indices of the first occurrence of every distinct point, in dataset order
fn first_distinct<T: Feature>(data: &Data<T>) -> Vec<usize> {
    let rows: Vec<Vec<f64>> = data.iter().map(|p| p.values().collect()).collect();
    let cmp_rows = |a: &[f64], b: &[f64]| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    };
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| cmp_rows(&rows[a], &rows[b]).then(a.cmp(&b)));

    let mut firsts: Vec<usize> = order
        .iter()
        .enumerate()
        .filter(|&(pos, &i)| pos == 0 || cmp_rows(&rows[order[pos - 1]], &rows[i]) != Ordering::Equal)
        .map(|(_, &i)| i)
        .collect();
    firsts.sort_unstable();
    firsts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::FitStatus;

    fn four_points() -> Arc<Data<f64>> {
        Data::from_rows(
            vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![6.0, 6.0]],
            vec![-1.0, -1.0, 1.0, 1.0],
        )
        .unwrap()
        .shared()
    }

    fn sorted_centroids(model: &KMeans) -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = Clusterer::<f64>::centroids(model)
            .unwrap()
            .rows()
            .into_iter()
            .map(|r| r.to_vec())
            .collect();
        rows.sort_by(|a, b| a[0].total_cmp(&b[0]));
        rows
    }

    #[test]
    fn test_kmeans_first_distinct() {
        let data = four_points();
        let mut model = KMeans::with_k(2);
        let report = model.fit(&data).unwrap();
        assert!(report.is_converged());
        assert_eq!(report.iterations, 2);

        let centroids = Clusterer::<f64>::centroids(&model).unwrap();
        assert!((centroids[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((centroids[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((centroids[[1, 0]] - 5.5).abs() < 1e-12);
        assert!((centroids[[1, 1]] - 5.5).abs() < 1e-12);
        assert_eq!(Clusterer::<f64>::assignments(&model).unwrap(), &[0, 0, 1, 1]);
        assert_eq!(model.inertia_history(), &[82.0, 12.0, 2.0]);
        assert_eq!(model.inertia(), Some(2.0));
    }

    #[test]
    fn test_kmeans_seeded_inits_agree() {
        let data = four_points();
        for init in [KMeansInit::Random, KMeansInit::KMeansPlusPlus] {
            for seed in 0..5 {
                let mut model = KMeans::new(
                    KMeansConfig::default()
                        .with_k(2)
                        .with_init(init)
                        .with_random_state(seed),
                );
                model.fit(&data).unwrap();
                assert_eq!(
                    sorted_centroids(&model),
                    vec![vec![0.5, 0.5], vec![5.5, 5.5]]
                );
            }
        }
    }

    #[test]
    fn test_kmeans_fixed_point_and_monotone_inertia() {
        let data = four_points();
        let mut model = KMeans::with_k(2);
        model.fit(&data).unwrap();
        let reassigned = model.assign(&data).unwrap();
        assert_eq!(reassigned, Clusterer::<f64>::assignments(&model).unwrap());

        let history = model.inertia_history();
        assert!(history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }

    #[test]
    fn test_kmeans_empty_cluster_reseed() {
        // The third centroid loses its last point after the first update
        let data = Data::from_rows(
            vec![
                vec![0.0, 0.0],
                vec![4.0, 2.0],
                vec![3.0, 2.0],
                vec![1.0, 1.0],
                vec![0.0, 3.0],
                vec![1.0, 2.0],
            ],
            vec![0.0; 6],
        )
        .unwrap()
        .shared();
        let mut model = KMeans::with_k(3);
        let report = model.fit(&data).unwrap();
        assert!(report.is_converged());
        assert_eq!(report.iterations, 3);

        let centroids = Clusterer::<f64>::centroids(&model).unwrap();
        assert!((centroids[[0, 0]] - 2.0 / 3.0).abs() < 1e-12);
        assert!((centroids[[0, 1]] - 1.0).abs() < 1e-12);
        assert_eq!(centroids.row(1).to_vec(), vec![3.5, 2.0]);
        assert_eq!(centroids.row(2).to_vec(), vec![0.0, 3.0]);
        assert_eq!(
            Clusterer::<f64>::assignments(&model).unwrap(),
            &[0, 1, 1, 0, 2, 0]
        );

        let history = model.inertia_history();
        assert!(history.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }

    #[test]
    fn test_kmeans_json() {
        let data = four_points();
        let mut model = KMeans::with_k(2);
        model.fit(&data).unwrap();
        let restored = KMeans::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(
            Clusterer::<f64>::centroids(&restored),
            Clusterer::<f64>::centroids(&model)
        );
        assert_eq!(restored.predict(&Point::unlabeled(vec![6.0, 5.0])).unwrap(), 1.0);
    }

    #[test]
    fn test_kmeans_predict() {
        let data = Data::from_rows(
            vec![vec![0.0, 0.0], vec![0.5, 0.5], vec![10.0, 10.0], vec![10.5, 10.5]],
            vec![0.0; 4],
        )
        .unwrap()
        .shared();
        let mut model = KMeans::with_k(2);
        model.fit(&data).unwrap();

        let a = model.predict(&Point::unlabeled(vec![0.1, 0.1])).unwrap();
        let b = model.predict(&Point::unlabeled(vec![10.1, 10.1])).unwrap();
        assert_ne!(a, b);
        assert_eq!(model.predict_batch(&data).unwrap().to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_kmeans_budget_exhausted() {
        let data = four_points();
        let mut model = KMeans::new(KMeansConfig::default().with_k(2).with_max_iter(1));
        let report = model.fit(&data).unwrap();
        assert_eq!(report.status, FitStatus::BudgetExhausted);
        assert!(model.is_fitted());
        // Assignments still match the returned centroids
        let reassigned = model.assign(&data).unwrap();
        assert_eq!(reassigned, Clusterer::<f64>::assignments(&model).unwrap());
    }

    #[test]
    fn test_kmeans_invalid_k() {
        let data = Data::from_rows(
            vec![vec![1.0], vec![1.0], vec![2.0]],
            vec![0.0; 3],
        )
        .unwrap()
        .shared();
        let mut model = KMeans::with_k(3);
        assert!(matches!(
            model.fit(&data),
            Err(MltkError::InvalidConfiguration { .. })
        ));
        let mut model = KMeans::with_k(0);
        assert!(model.fit(&data).is_err());
        assert!(matches!(
            model.predict(&Point::unlabeled(vec![1.0])),
            Err(MltkError::NotFitted)
        ));
    }

    #[test]
    fn test_kmeans_unlabeled_data_and_rbf() {
        let points = vec![
            Point::unlabeled(vec![0.0]),
            Point::unlabeled(vec![0.2]),
            Point::unlabeled(vec![9.0]),
            Point::unlabeled(vec![9.4]),
        ];
        let data = Data::new(points).unwrap().shared();
        let mut model = KMeans::new(
            KMeansConfig::default()
                .with_k(2)
                .with_kernel(Kernel::Rbf { gamma: 0.1 }),
        );
        assert!(model.fit(&data).unwrap().is_converged());
        let labels = Clusterer::<f64>::assignments(&model).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn test_first_distinct() {
        let data = Data::from_rows(
            vec![vec![2.0], vec![1.0], vec![2.0], vec![3.0], vec![1.0]],
            vec![0.0; 5],
        )
        .unwrap();
        assert_eq!(first_distinct(&data), vec![0, 1, 3]);
    }
}
