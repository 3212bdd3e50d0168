//! Metric evaluation.
//!
//! A [`Metric`] is a scoring function plus an aggregation mode. Rows with zero
//! weight are excluded before scoring. With [`Aggregation::Mean`], tasks whose
//! score is undefined (no weighted rows, or a single class for ROC-AUC) are
//! skipped with a warning; with [`Aggregation::PerTask`] they are an error.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use molbench_core::{MolbenchError, Result};
use molbench_data::{Dataset, Transformer};

/// Scoring functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Area under the ROC curve.
    RocAuc,
    /// Fraction of thresholded predictions equal to the label.
    Accuracy,
    /// True positives over predicted positives.
    Precision,
    /// True positives over actual positives.
    Recall,
    /// Coefficient of determination.
    R2,
}

impl MetricKind {
    /// Name used as the score key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RocAuc => "roc_auc_score",
            Self::Accuracy => "accuracy_score",
            Self::Precision => "precision_score",
            Self::Recall => "recall_score",
            Self::R2 => "r2_score",
        }
    }
}

/// How per-task values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// One value per task; any undefined task is an error.
    PerTask,
    /// Mean over tasks with a defined score.
    #[default]
    Mean,
}

/// A named scoring function with its aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Scoring function.
    pub kind: MetricKind,
    /// Aggregation mode.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Probability cut-off for thresholded metrics.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

fn default_threshold() -> f32 {
    0.5
}

impl Metric {
    /// Per-task metric of `kind`.
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            aggregation: Aggregation::PerTask,
            threshold: default_threshold(),
        }
    }

    /// Mean-aggregated metric of `kind`.
    pub fn mean(kind: MetricKind) -> Self {
        Self {
            aggregation: Aggregation::Mean,
            ..Self::new(kind)
        }
    }

    /// Sets the threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Key of this metric in [`Scores`]: `<name>` or `mean-<name>`.
    pub fn key(&self) -> String {
        match self.aggregation {
            Aggregation::PerTask => self.kind.name().to_string(),
            Aggregation::Mean => format!("mean-{}", self.kind.name()),
        }
    }

    /// Scores one task column. Rows with zero weight are excluded.
    pub fn score_task(
        &self,
        y_true: ArrayView1<f32>,
        y_pred: ArrayView1<f32>,
        w: ArrayView1<f32>,
    ) -> std::result::Result<f64, String> {
        let rows: Vec<(f32, f32, f32)> = y_true
            .iter()
            .zip(y_pred.iter())
            .zip(w.iter())
            .filter(|(_, &w)| w != 0.0)
            .map(|((&t, &p), &w)| (t, p, w))
            .collect();
        if rows.is_empty() {
            return Err("no weighted examples".to_string());
        }
        match self.kind {
            MetricKind::RocAuc => roc_auc(&rows),
            MetricKind::Accuracy => {
                let correct = rows
                    .iter()
                    .filter(|(t, p, _)| (*t > 0.5) == (*p >= self.threshold))
                    .count();
                Ok(correct as f64 / rows.len() as f64)
            }
            MetricKind::Precision => {
                let (tp, fp) = rows.iter().fold((0usize, 0usize), |(tp, fp), (t, p, _)| {
                    match (*t > 0.5, *p >= self.threshold) {
                        (true, true) => (tp + 1, fp),
                        (false, true) => (tp, fp + 1),
                        _ => (tp, fp),
                    }
                });
                if tp + fp == 0 {
                    Ok(0.0)
                } else {
                    Ok(tp as f64 / (tp + fp) as f64)
                }
            }
            MetricKind::Recall => {
                let (tp, fneg) = rows.iter().fold((0usize, 0usize), |(tp, fneg), (t, p, _)| {
                    match (*t > 0.5, *p >= self.threshold) {
                        (true, true) => (tp + 1, fneg),
                        (true, false) => (tp, fneg + 1),
                        _ => (tp, fneg),
                    }
                });
                if tp + fneg == 0 {
                    Err("no positive examples".to_string())
                } else {
                    Ok(tp as f64 / (tp + fneg) as f64)
                }
            }
            MetricKind::R2 => {
                let n = rows.len() as f64;
                let mean = rows.iter().map(|(t, _, _)| f64::from(*t)).sum::<f64>() / n;
                let ss_tot: f64 = rows
                    .iter()
                    .map(|(t, _, _)| (f64::from(*t) - mean).powi(2))
                    .sum();
                let ss_res: f64 = rows
                    .iter()
                    .map(|(t, p, _)| (f64::from(*t) - f64::from(*p)).powi(2))
                    .sum();
                if ss_tot == 0.0 {
                    Err("labels have zero variance".to_string())
                } else {
                    Ok(1.0 - ss_res / ss_tot)
                }
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// ROC-AUC via the rank statistic, with tied scores sharing their average rank.
fn roc_auc(rows: &[(f32, f32, f32)]) -> std::result::Result<f64, String> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| rows[a].1.total_cmp(&rows[b].1));

    let mut ranks = vec![0.0f64; rows.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && rows[order[j + 1]].1 == rows[order[i]].1 {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = avg;
        }
        i = j + 1;
    }

    let n_pos = rows.iter().filter(|(t, _, _)| *t > 0.5).count();
    let n_neg = rows.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err("only one class present".to_string());
    }
    let pos_rank_sum: f64 = rows
        .iter()
        .zip(&ranks)
        .filter(|((t, _, _), _)| *t > 0.5)
        .map(|(_, r)| r)
        .sum();
    let n_pos = n_pos as f64;
    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Values of one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    /// Score per task that could be scored.
    pub per_task: BTreeMap<String, f64>,
    /// Mean over `per_task`, for mean-aggregated metrics.
    pub mean: Option<f64>,
}

impl MetricScores {
    /// The mean if present, else the only per-task value.
    pub fn primary(&self) -> Option<f64> {
        self.mean.or_else(|| match self.per_task.len() {
            1 => self.per_task.values().next().copied(),
            _ => None,
        })
    }
}

/// Scores keyed by [`Metric::key`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores(pub BTreeMap<String, MetricScores>);

impl Scores {
    /// Scores of metric `key`.
    pub fn get(&self, key: &str) -> Option<&MetricScores> {
        self.0.get(key)
    }

    /// Primary value of metric `key`; see [`MetricScores::primary`].
    pub fn primary(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetricScores::primary)
    }

    /// Metric keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Largest absolute difference between matching values of two score sets.
    /// A value present on one side only counts as infinite.
    pub fn max_abs_diff(&self, other: &Scores) -> f64 {
        let mut worst = 0.0f64;
        for (key, a) in &self.0 {
            let Some(b) = other.0.get(key) else {
                return f64::INFINITY;
            };
            let pairs = a
                .per_task
                .iter()
                .map(|(task, va)| (Some(*va), b.per_task.get(task).copied()))
                .chain(std::iter::once((a.mean, b.mean)));
            for pair in pairs {
                match pair {
                    (Some(x), Some(y)) => worst = worst.max((x - y).abs()),
                    (None, None) => {}
                    _ => return f64::INFINITY,
                }
            }
        }
        if other.0.keys().any(|k| !self.0.contains_key(k)) {
            return f64::INFINITY;
        }
        worst
    }
}

/// Scores predictions against a dataset.
///
/// `untransform` of each transformer is applied in reverse order to both the
/// predictions and the labels before scoring.
pub fn evaluate_predictions(
    dataset: &Dataset,
    y_pred: &Array2<f32>,
    metrics: &[Metric],
    transformers: &[Transformer],
) -> Result<Scores> {
    let all: Vec<usize> = (0..dataset.n_tasks()).collect();
    evaluate_tasks(dataset, y_pred, metrics, transformers, &all)
}

/// Like [`evaluate_predictions`], restricted to the task columns in `tasks`.
/// Other columns are neither scored nor reported.
pub fn evaluate_tasks(
    dataset: &Dataset,
    y_pred: &Array2<f32>,
    metrics: &[Metric],
    transformers: &[Transformer],
    tasks: &[usize],
) -> Result<Scores> {
    if let Some(&t) = tasks.iter().find(|&&t| t >= dataset.n_tasks()) {
        return Err(MolbenchError::config(format!(
            "task index {t} out of range for {} tasks",
            dataset.n_tasks()
        )));
    }
    if y_pred.dim() != dataset.y().dim() {
        return Err(MolbenchError::config(format!(
            "predictions {:?} do not match labels {:?}",
            y_pred.dim(),
            dataset.y().dim()
        )));
    }
    let mut y_true = dataset.y().clone();
    let mut y_pred = y_pred.clone();
    for t in transformers.iter().rev() {
        y_true = t.untransform(&y_true);
        y_pred = t.untransform(&y_pred);
    }

    let mut scores = BTreeMap::new();
    for metric in metrics {
        let mut per_task = BTreeMap::new();
        for &t in tasks {
            let task = &dataset.tasks()[t];
            match metric.score_task(y_true.column(t), y_pred.column(t), dataset.w().column(t)) {
                Ok(v) => {
                    per_task.insert(task.clone(), v);
                }
                Err(reason) => match metric.aggregation {
                    Aggregation::PerTask => {
                        return Err(MolbenchError::computation(metric.kind.name(), task, reason));
                    }
                    Aggregation::Mean => {
                        tracing::warn!(
                            metric = metric.kind.name(),
                            task = %task,
                            reason = %reason,
                            "Skipping task in mean"
                        );
                    }
                },
            }
        }
        let mean = match metric.aggregation {
            Aggregation::PerTask => None,
            Aggregation::Mean => {
                if per_task.is_empty() {
                    return Err(MolbenchError::computation(
                        metric.kind.name(),
                        "*",
                        "no task could be scored",
                    ));
                }
                Some(per_task.values().sum::<f64>() / per_task.len() as f64)
            }
        };
        scores.insert(metric.key(), MetricScores { per_task, mean });
    }
    Ok(Scores(scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn dataset(y: Array2<f32>) -> Dataset {
        let n = y.nrows();
        let tasks = (0..y.ncols()).map(|t| format!("t{t}")).collect();
        Dataset::from_dense(Array2::zeros((n, 1)), y, tasks).unwrap()
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let ds = dataset(array![[0.0], [0.0], [1.0], [1.0]]);
        let m = Metric::new(MetricKind::RocAuc);
        let s = evaluate_predictions(&ds, &array![[0.1], [0.2], [0.8], [0.9]], &[m], &[]).unwrap();
        assert_eq!(s.primary("roc_auc_score"), Some(1.0));
        let s = evaluate_predictions(&ds, &array![[0.9], [0.8], [0.2], [0.1]], &[m], &[]).unwrap();
        assert_eq!(s.primary("roc_auc_score"), Some(0.0));
    }

    #[test]
    fn test_auc_ties_count_half() {
        let ds = dataset(array![[0.0], [1.0]]);
        let s = evaluate_predictions(
            &ds,
            &array![[0.5], [0.5]],
            &[Metric::new(MetricKind::RocAuc)],
            &[],
        )
        .unwrap();
        assert_eq!(s.primary("roc_auc_score"), Some(0.5));
    }

    #[test]
    fn test_zero_weight_rows_excluded() {
        let ds = dataset(array![[0.0], [1.0], [1.0]]);
        let mut w = ds.w().clone();
        w[[2, 0]] = 0.0;
        let ds = ds.with_weights(w).unwrap();
        // the excluded row would be misclassified
        let s = evaluate_predictions(
            &ds,
            &array![[0.1], [0.9], [0.0]],
            &[Metric::new(MetricKind::Accuracy)],
            &[],
        )
        .unwrap();
        assert_eq!(s.primary("accuracy_score"), Some(1.0));
    }

    #[test]
    fn test_mean_skips_single_class_task() {
        let ds = dataset(array![[0.0, 1.0], [1.0, 1.0]]);
        let pred = array![[0.2, 0.7], [0.8, 0.6]];
        let s = evaluate_predictions(&ds, &pred, &[Metric::mean(MetricKind::RocAuc)], &[]).unwrap();
        let entry = s.get("mean-roc_auc_score").unwrap();
        assert_eq!(entry.per_task.len(), 1);
        assert_eq!(entry.mean, Some(1.0));

        let err =
            evaluate_predictions(&ds, &pred, &[Metric::new(MetricKind::RocAuc)], &[]).unwrap_err();
        assert!(matches!(err, MolbenchError::Computation { ref task, .. } if task == "t1"));
    }

    #[test]
    fn test_mean_with_no_valid_task_fails() {
        let ds = dataset(array![[1.0], [1.0]]);
        let err = evaluate_predictions(
            &ds,
            &array![[0.5], [0.6]],
            &[Metric::mean(MetricKind::RocAuc)],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, MolbenchError::Computation { .. }));
    }

    #[test]
    fn test_precision_recall_r2() {
        let ds = dataset(array![[1.0], [1.0], [0.0], [0.0]]);
        let pred = array![[0.9], [0.2], [0.7], [0.1]];
        let s = evaluate_predictions(
            &ds,
            &pred,
            &[
                Metric::new(MetricKind::Precision),
                Metric::new(MetricKind::Recall),
                Metric::new(MetricKind::R2),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(s.primary("precision_score"), Some(0.5));
        assert_eq!(s.primary("recall_score"), Some(0.5));
        let r2 = s.primary("r2_score").unwrap();
        assert!(r2 < 1.0);
    }

    #[test]
    fn test_balanced_dataset_scores_on_original_labels() {
        let ds = dataset(array![[1.0], [0.0], [0.0], [0.0]]);
        let tr = Transformer::balancing(&ds);
        let balanced = tr.transform(&ds).unwrap();
        let pred = array![[0.8], [0.3], [0.9], [0.1]];
        let m = [Metric::new(MetricKind::Accuracy), Metric::new(MetricKind::RocAuc)];
        let plain = evaluate_predictions(&ds, &pred, &m, &[]).unwrap();
        let s = evaluate_predictions(&balanced, &pred, &m, &[tr]).unwrap();
        assert_eq!(s, plain);
        assert_eq!(s.primary("accuracy_score"), Some(0.75));
    }

    #[test]
    fn test_max_abs_diff() {
        let ds = dataset(array![[0.0], [1.0], [1.0]]);
        let m = [Metric::mean(MetricKind::RocAuc)];
        let a = evaluate_predictions(&ds, &array![[0.1], [0.9], [0.8]], &m, &[]).unwrap();
        let b = evaluate_predictions(&ds, &array![[0.85], [0.9], [0.8]], &m, &[]).unwrap();
        assert_eq!(a.max_abs_diff(&a), 0.0);
        assert!((a.max_abs_diff(&b) - 0.5).abs() < 1e-9);
        assert_eq!(a.max_abs_diff(&Scores::default()), f64::INFINITY);
    }
}
