//! Multi-class composition of binary classifiers
//!
//! Both strategies clone a binary prototype once per sub-problem, relabel
//! the data to −1/+1 and fit the members in parallel.

use num_traits::AsPrimitive;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::dataset::{Data, Feature, Point};
use crate::error::{MltkError, Result};
use crate::synthetic::Smote;
use crate::training::models::{log_fit, Classifier, FitReport, Learner};

fn multiclass_labels<T: Feature>(data: &Data<T>, algorithm: &str) -> Result<Vec<i64>> {
    data.ensure_non_empty()?;
    let classes = data.classes()?;
    if classes.len() < 2 {
        return Err(MltkError::InvalidLabels(format!(
            "{} needs at least two classes, found {}",
            algorithm,
            classes.len()
        )));
    }
    Ok(classes)
}

#[inline]
fn class_of(y: f64) -> i64 {
    y.round() as i64
}

fn merge_reports(reports: impl IntoIterator<Item = FitReport>) -> FitReport {
    reports
        .into_iter()
        .reduce(FitReport::merge)
        .unwrap_or_else(|| FitReport::converged(0, 0))
}

/// One binary classifier per class against all other classes.
///
/// Predicts the class whose member reports the highest decision value;
/// ties go to the lowest class.
#[derive(Debug, Clone)]
pub struct OneVsAll<C> {
    prototype: C,
    members: Vec<(i64, C)>,
}

impl<C> OneVsAll<C> {
    pub fn new(prototype: C) -> Self {
        Self {
            prototype,
            members: Vec::new(),
        }
    }

    /// Fitted classes in ascending order
    pub fn classes(&self) -> Vec<i64> {
        self.members.iter().map(|(c, _)| *c).collect()
    }

    /// Fitted member for `class`
    pub fn member(&self, class: i64) -> Option<&C> {
        self.members.iter().find(|(c, _)| *c == class).map(|(_, m)| m)
    }
}

impl<C> OneVsAll<C> {
    /// Decision value of every member, in class order
    pub fn decision_values<T>(&self, point: &Point<T>) -> Result<Vec<f64>>
    where
        T: Feature,
        C: Classifier<T>,
    {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        self.members
            .iter()
            .map(|(_, m)| m.decision_function(point))
            .collect()
    }
}

impl<T, C> Learner<T> for OneVsAll<C>
where
    T: Feature,
    C: Classifier<T> + Clone,
{
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.members.clear();
        let classes = multiclass_labels(data, "one_vs_all")?;
        debug!(
            algorithm = "one_vs_all",
            base = self.prototype.name(),
            n_samples = data.len(),
            n_classes = classes.len(),
            "Fitting"
        );

        let fitted = classes
            .par_iter()
            .map(|&class| {
                let binary = data
                    .relabel(|y| if class_of(y) == class { 1.0 } else { -1.0 })
                    .shared();
                let mut member = self.prototype.clone();
                let report = member.fit(&binary)?;
                Ok((class, member, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = merge_reports(fitted.iter().map(|(_, _, r)| *r));
        self.members = fitted.into_iter().map(|(c, m, _)| (c, m)).collect();
        log_fit("one_vs_all", &report);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let values = self.decision_values(point)?;
        let mut best = 0;
        for (i, &v) in values.iter().enumerate().skip(1) {
            if v > values[best] {
                best = i;
            }
        }
        Ok(self.members[best].0 as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    fn name(&self) -> &'static str {
        "one_vs_all"
    }
}

/// One binary classifier per pair of classes, fit on the points of those
/// two classes only.
///
/// Each member votes for one class of its pair; the class with the most
/// votes wins and ties go to the lowest class. With an over-sampler set,
/// each pair's data is over-sampled before its member is fit.
#[derive(Debug, Clone)]
pub struct OneVsOne<C> {
    prototype: C,
    oversampling: Option<Smote>,
    classes: Vec<i64>,
    /// `(negative class index, positive class index, member)`
    members: Vec<(usize, usize, C)>,
}

impl<C> OneVsOne<C> {
    pub fn new(prototype: C) -> Self {
        Self {
            prototype,
            oversampling: None,
            classes: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Over-sample the minority class of every pair before fitting
    pub fn with_oversampling(mut self, smote: Smote) -> Self {
        self.oversampling = Some(smote);
        self
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn n_members(&self) -> usize {
        self.members.len()
    }

    /// Votes per class, in class order
    pub fn votes<T>(&self, point: &Point<T>) -> Result<Vec<usize>>
    where
        T: Feature,
        C: Classifier<T>,
    {
        if self.members.is_empty() {
            return Err(MltkError::NotFitted);
        }
        let mut votes = vec![0usize; self.classes.len()];
        for (neg, pos, member) in &self.members {
            if member.predict(point)? > 0.0 {
                votes[*pos] += 1;
            } else {
                votes[*neg] += 1;
            }
        }
        Ok(votes)
    }
}

impl<T, C> Learner<T> for OneVsOne<C>
where
    T: Feature,
    f64: AsPrimitive<T>,
    C: Classifier<T> + Clone,
{
    fn fit(&mut self, data: &Arc<Data<T>>) -> Result<FitReport> {
        self.classes.clear();
        self.members.clear();
        let classes = multiclass_labels(data, "one_vs_one")?;
        let pairs: Vec<(usize, usize)> = (0..classes.len())
            .flat_map(|a| (a + 1..classes.len()).map(move |b| (a, b)))
            .collect();
        debug!(
            algorithm = "one_vs_one",
            base = self.prototype.name(),
            n_samples = data.len(),
            n_classes = classes.len(),
            n_pairs = pairs.len(),
            oversampling = self.oversampling.is_some(),
            "Fitting"
        );

        let fitted = pairs
            .par_iter()
            .map(|&(a, b)| {
                let (neg, pos) = (classes[a], classes[b]);
                let indices: Vec<usize> = data
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| {
                        let class = class_of(p.label()?);
                        (class == neg || class == pos).then_some(i)
                    })
                    .collect();
                let mut pair = data.select(&indices)?;
                if let Some(smote) = &self.oversampling {
                    pair = smote.resample(&pair)?;
                }
                let pair = pair
                    .relabel(|y| if class_of(y) == pos { 1.0 } else { -1.0 })
                    .shared();
                let mut member = self.prototype.clone();
                let report = member.fit(&pair)?;
                Ok((a, b, member, report))
            })
            .collect::<Result<Vec<_>>>()?;

        let report = merge_reports(fitted.iter().map(|(_, _, _, r)| *r));
        self.members = fitted.into_iter().map(|(a, b, m, _)| (a, b, m)).collect();
        self.classes = classes;
        log_fit("one_vs_one", &report);
        Ok(report)
    }

    fn predict(&self, point: &Point<T>) -> Result<f64> {
        let votes = self.votes(point)?;
        let mut best = 0;
        for (i, &v) in votes.iter().enumerate().skip(1) {
            if v > votes[best] {
                best = i;
            }
        }
        Ok(self.classes[best] as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.members.is_empty()
    }

    fn name(&self) -> &'static str {
        "one_vs_one"
    }
}
