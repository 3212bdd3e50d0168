//! Random forest classifier for a single task.
//!
//! CART trees split on Gini impurity over bootstrap samples, with per-split
//! feature subsampling and optional balanced class weights. Trees are grown in
//! parallel on a rayon pool. Each tree gets its own seed drawn up front from the
//! training context, so the forest is the same for any thread count.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use molbench_checkpoint::{ModelManifest, ModelState};
use molbench_core::{
    ForestParams, HyperParams, LoadError, ModelFamily, MolbenchError, Result, TrainingContext,
};
use molbench_data::Dataset;

use crate::model::{dense_input, FitOptions, Model};
use crate::storage::{self, DEFAULT_MAX_TO_KEEP};

const LEAF: i64 = -1;

/// A binary decision tree stored as parallel node arrays.
///
/// Node 0 is the root. A node with `feature == -1` is a leaf whose `value` is
/// the weighted fraction of positive samples that reached it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionTree {
    feature: Vec<i64>,
    threshold: Vec<f32>,
    left: Vec<i64>,
    right: Vec<i64>,
    value: Vec<f32>,
}

impl DecisionTree {
    fn push_node(&mut self) -> usize {
        self.feature.push(LEAF);
        self.threshold.push(0.0);
        self.left.push(LEAF);
        self.right.push(LEAF);
        self.value.push(0.0);
        self.feature.len() - 1
    }

    /// Number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.feature.len()
    }

    /// Positive-class probability for one sample.
    pub fn predict_row(&self, row: ArrayView1<f32>) -> f32 {
        let mut node = 0;
        while self.feature[node] != LEAF {
            let feature = self.feature[node] as usize;
            node = if row[feature] <= self.threshold[node] {
                self.left[node] as usize
            } else {
                self.right[node] as usize
            };
        }
        self.value[node]
    }

    /// Checks that the node arrays describe a well-formed tree.
    fn check(&self, n_features: usize) -> std::result::Result<(), String> {
        let n = self.n_nodes();
        if n == 0 {
            return Err("tree has no nodes".into());
        }
        if [self.threshold.len(), self.left.len(), self.right.len(), self.value.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err("node arrays differ in length".into());
        }
        for i in 0..n {
            if self.feature[i] == LEAF {
                continue;
            }
            if self.feature[i] < 0 || self.feature[i] as usize >= n_features {
                return Err(format!("node {i} splits on feature {}", self.feature[i]));
            }
            // children always come after their parent
            for child in [self.left[i], self.right[i]] {
                if child <= i as i64 || child as usize >= n {
                    return Err(format!("node {i} has invalid child {child}"));
                }
            }
        }
        Ok(())
    }

    fn save(&self, k: usize, state: &mut ModelState) {
        state.add_ints(format!("tree{k}.feature"), self.feature.clone());
        state.add_ints(format!("tree{k}.left"), self.left.clone());
        state.add_ints(format!("tree{k}.right"), self.right.clone());
        state.add_vector(format!("tree{k}.threshold"), &Array1::from(self.threshold.clone()));
        state.add_vector(format!("tree{k}.value"), &Array1::from(self.value.clone()));
    }

    fn load(k: usize, state: &ModelState, n_features: usize) -> Result<Self> {
        let tree = Self {
            feature: state.ints(&format!("tree{k}.feature"))?.to_vec(),
            left: state.ints(&format!("tree{k}.left"))?.to_vec(),
            right: state.ints(&format!("tree{k}.right"))?.to_vec(),
            threshold: state.vector(&format!("tree{k}.threshold"))?.to_vec(),
            value: state.vector(&format!("tree{k}.value"))?.to_vec(),
        };
        tree.check(n_features)
            .map_err(|reason| LoadError::Corrupted(format!("tree {k}: {reason}")))?;
        Ok(tree)
    }
}

fn gini(positive: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = positive / total;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct Split {
    feature: usize,
    threshold: f32,
    impurity: f64,
}

/// Training data shared by every tree.
struct TreeData<'a> {
    x: &'a Array2<f32>,
    positive: &'a [bool],
    /// Dataset weight times class weight, zero for excluded rows.
    base_weight: &'a [f64],
}

impl TreeData<'_> {
    fn best_split(
        &self,
        rows: &[usize],
        weight: &[f64],
        max_features: usize,
        rng: &mut StdRng,
    ) -> Option<Split> {
        let (total_pos, total) = rows.iter().fold((0.0, 0.0), |(p, t), &r| {
            let w = weight[r];
            (p + if self.positive[r] { w } else { 0.0 }, t + w)
        });

        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);
        let mut best: Option<Split> = None;
        let mut visited = 0;
        let mut sorted = rows.to_vec();
        for feature in features {
            // keep looking past max_features until some split is valid
            if visited >= max_features && best.is_some() {
                break;
            }
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let first = self.x[[sorted[0], feature]];
            let last = self.x[[sorted[sorted.len() - 1], feature]];
            if first == last {
                continue;
            }
            visited += 1;

            let (mut left_pos, mut left_total) = (0.0, 0.0);
            for i in 0..sorted.len() - 1 {
                let r = sorted[i];
                let w = weight[r];
                left_total += w;
                if self.positive[r] {
                    left_pos += w;
                }
                let here = self.x[[r, feature]];
                let next = self.x[[sorted[i + 1], feature]];
                if here == next {
                    continue;
                }
                let right_total = total - left_total;
                let impurity = left_total * gini(left_pos, left_total)
                    + right_total * gini(total_pos - left_pos, right_total);
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    best = Some(Split {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        impurity,
                    });
                }
            }
        }
        best
    }

    fn grow(&self, params: &ForestParams, max_features: usize, seed: u64) -> DecisionTree {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = self.x.nrows();
        let mut weight = self.base_weight.to_vec();
        if params.bootstrap {
            let mut counts = vec![0u32; n];
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1;
            }
            for (w, c) in weight.iter_mut().zip(counts) {
                *w *= f64::from(c);
            }
        }
        let rows: Vec<usize> = (0..n).filter(|&r| weight[r] > 0.0).collect();

        let mut tree = DecisionTree::default();
        let root = tree.push_node();
        let mut stack = vec![(root, rows, 0usize)];
        while let Some((node, rows, depth)) = stack.pop() {
            let (pos, total) = rows.iter().fold((0.0, 0.0), |(p, t), &r| {
                (p + if self.positive[r] { weight[r] } else { 0.0 }, t + weight[r])
            });
            tree.value[node] = if total > 0.0 { (pos / total) as f32 } else { 0.5 };

            let pure = pos == 0.0 || pos == total;
            let too_deep = params.max_depth.is_some_and(|d| depth >= d);
            if pure || too_deep || rows.len() < params.min_samples_split {
                continue;
            }
            let Some(split) = self.best_split(&rows, &weight, max_features, &mut rng) else {
                continue;
            };
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .copied()
                .partition(|&r| self.x[[r, split.feature]] <= split.threshold);
            let left = tree.push_node();
            let right = tree.push_node();
            tree.feature[node] = split.feature as i64;
            tree.threshold[node] = split.threshold;
            tree.left[node] = left as i64;
            tree.right[node] = right as i64;
            stack.push((right, right_rows, depth + 1));
            stack.push((left, left_rows, depth + 1));
        }
        tree
    }
}

/// Random forest over one task.
pub struct RandomForestModel {
    params: ForestParams,
    tasks: Vec<String>,
    model_dir: PathBuf,
    max_to_keep: usize,
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForestModel {
    /// Creates an unfitted forest.
    pub fn new(params: ForestParams, tasks: Vec<String>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            params,
            tasks,
            model_dir: model_dir.into(),
            max_to_keep: DEFAULT_MAX_TO_KEEP,
            trees: Vec::new(),
            n_features: 0,
        }
    }

    /// Sets how many checkpoints the model directory retains.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    /// Fitted trees.
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Model for RandomForestModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::RandomForest
    }

    fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    fn tasks(&self) -> &[String] {
        &self.tasks
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Grows a new forest; `options` is ignored since forests do not train in epochs.
    fn fit(
        &mut self,
        dataset: &Dataset,
        _options: &FitOptions,
        ctx: &mut TrainingContext,
    ) -> Result<()> {
        if self.tasks.len() != 1 || dataset.tasks() != self.tasks.as_slice() {
            return Err(MolbenchError::config(format!(
                "random forest fits exactly one task; model has {:?}, dataset has {:?}",
                self.tasks,
                dataset.tasks()
            )));
        }
        let x = dense_input(dataset, "random_forest")?;
        let positive: Vec<bool> = dataset.y().column(0).iter().map(|&v| v > 0.5).collect();
        let w = dataset.w().column(0);

        let mut base_weight: Vec<f64> = w.iter().map(|&v| f64::from(v.max(0.0))).collect();
        if self.params.balanced_class_weight {
            let n_pos = positive
                .iter()
                .zip(&base_weight)
                .filter(|(p, w)| **p && **w > 0.0)
                .count();
            let n_all = base_weight.iter().filter(|&&w| w > 0.0).count();
            let n_neg = n_all - n_pos;
            let class_weight = |count: usize| {
                if count == 0 {
                    1.0
                } else {
                    n_all as f64 / (2.0 * count as f64)
                }
            };
            let (pos_w, neg_w) = (class_weight(n_pos), class_weight(n_neg));
            for (bw, &p) in base_weight.iter_mut().zip(&positive) {
                *bw *= if p { pos_w } else { neg_w };
            }
        }

        let seeds: Vec<u64> = (0..self.params.n_estimators)
            .map(|_| ctx.derive_seed())
            .collect();
        let max_features = self.params.max_features.resolve(x.ncols());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_jobs.unwrap_or(0))
            .build()
            .map_err(|e| MolbenchError::config(format!("cannot start tree workers: {e}")))?;

        tracing::info!(
            task = %self.tasks[0],
            samples = dataset.len(),
            n_estimators = self.params.n_estimators,
            max_features,
            threads = pool.current_num_threads(),
            "Growing random forest"
        );
        let start = Instant::now();
        let data = TreeData {
            x,
            positive: &positive,
            base_weight: &base_weight,
        };
        let params = &self.params;
        let trees: Vec<DecisionTree> = pool.install(|| {
            seeds
                .par_iter()
                .map(|&seed| data.grow(params, max_features, seed))
                .collect()
        });
        let nodes: usize = trees.iter().map(DecisionTree::n_nodes).sum();
        self.trees = trees;
        self.n_features = x.ncols();
        tracing::info!(
            task = %self.tasks[0],
            nodes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Grew random forest"
        );
        Ok(())
    }

    fn predict(&self, dataset: &Dataset) -> Result<Array2<f32>> {
        if self.trees.is_empty() {
            return Err(MolbenchError::NotFitted);
        }
        let x = dense_input(dataset, "random_forest")?;
        if x.ncols() != self.n_features {
            return Err(MolbenchError::config(format!(
                "forest expects {} features, dataset has {}",
                self.n_features,
                x.ncols()
            )));
        }
        let n_trees = self.trees.len() as f32;
        let probs: Vec<f32> = x
            .outer_iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f32>() / n_trees)
            .collect();
        Array2::from_shape_vec((probs.len(), 1), probs)
            .map_err(|e| MolbenchError::config(e.to_string()))
    }

    fn save(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(MolbenchError::NotFitted);
        }
        let mut state = ModelState::new(ModelFamily::RandomForest.key(), 1);
        for (k, tree) in self.trees.iter().enumerate() {
            tree.save(k, &mut state);
        }
        state.set_metadata("n_trees", self.trees.len().to_string());
        let checkpoint = storage::write_state(&self.model_dir, &state, self.max_to_keep)?;

        let mut manifest =
            ModelManifest::new(ModelFamily::RandomForest, self.tasks.clone(), self.n_features)
                .with_hyperparams(HyperParams::Forest(self.params.clone()));
        manifest.epochs = 1;
        manifest.checkpoint = Some(checkpoint);
        manifest.write(&self.model_dir)?;
        tracing::info!(dir = %self.model_dir.display(), trees = self.trees.len(), "Saved random forest");
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let manifest = storage::read_manifest(&self.model_dir, ModelFamily::RandomForest)?;
        let state = storage::read_state(&self.model_dir, &manifest)?;
        let n_trees: usize = state
            .metadata_value("n_trees")?
            .parse()
            .map_err(|e| LoadError::Corrupted(format!("n_trees: {e}")))?;
        let trees = (0..n_trees)
            .map(|k| DecisionTree::load(k, &state, manifest.n_features))
            .collect::<Result<Vec<_>>>()?;
        if trees.is_empty() {
            return Err(LoadError::Corrupted("forest has no trees".into()).into());
        }

        if let Some(HyperParams::Forest(params)) = manifest.hyperparams {
            self.params = params;
        }
        self.trees = trees;
        self.tasks = manifest.tasks;
        self.n_features = manifest.n_features;
        tracing::info!(dir = %self.model_dir.display(), trees = n_trees, "Reloaded random forest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn xor_like() -> Dataset {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.9],
            [0.9, 0.1],
            [1.0, 1.0],
            [0.2, 0.1],
            [0.8, 0.9],
            [0.1, 0.8],
            [0.9, 0.2]
        ];
        let y = array![[0.0], [1.0], [1.0], [0.0], [0.0], [0.0], [1.0], [1.0]];
        Dataset::from_dense(x, y, vec!["t".into()]).unwrap()
    }

    fn params() -> ForestParams {
        ForestParams {
            max_features: molbench_core::MaxFeatures::All,
            bootstrap: false,
            n_jobs: Some(2),
            ..ForestParams::default()
        }
        .with_n_estimators(5)
    }

    #[test]
    fn test_fits_training_data_exactly_without_bootstrap() {
        let dir = tempdir().unwrap();
        let ds = xor_like();
        let mut model = RandomForestModel::new(params(), vec!["t".into()], dir.path());
        model
            .fit(&ds, &FitOptions::default(), &mut TrainingContext::new(1))
            .unwrap();
        let p = model.predict(&ds).unwrap();
        for (pred, label) in p.column(0).iter().zip(ds.y().column(0)) {
            assert_eq!(*pred, *label);
        }
    }

    #[test]
    fn test_same_seed_same_forest_any_thread_count() {
        let ds = xor_like();
        let grow = |jobs: usize| {
            let p = ForestParams {
                n_jobs: Some(jobs),
                bootstrap: true,
                ..params()
            };
            let mut model = RandomForestModel::new(p, vec!["t".into()], "/unused");
            model
                .fit(&ds, &FitOptions::default(), &mut TrainingContext::new(5))
                .unwrap();
            model.trees().to_vec()
        };
        assert_eq!(grow(1), grow(3));
    }

    #[test]
    fn test_save_reload_predicts_identically() {
        let dir = tempdir().unwrap();
        let ds = xor_like();
        let mut model = RandomForestModel::new(
            ForestParams {
                bootstrap: true,
                ..params()
            },
            vec!["t".into()],
            dir.path(),
        );
        model
            .fit(&ds, &FitOptions::default(), &mut TrainingContext::new(2))
            .unwrap();
        model.save().unwrap();

        let mut fresh = RandomForestModel::new(ForestParams::default(), vec!["t".into()], dir.path());
        fresh.reload().unwrap();
        assert_eq!(fresh.trees().len(), 5);
        assert_eq!(fresh.predict(&ds).unwrap(), model.predict(&ds).unwrap());
    }

    #[test]
    fn test_multiple_tasks_rejected() {
        let ds = Dataset::from_dense(
            Array2::zeros((2, 1)),
            Array2::zeros((2, 2)),
            vec!["a".into(), "b".into()],
        )
        .unwrap();
        let mut model = RandomForestModel::new(params(), vec!["a".into(), "b".into()], "/unused");
        let err = model
            .fit(&ds, &FitOptions::default(), &mut TrainingContext::new(0))
            .unwrap_err();
        assert!(err.is_config());
        assert!(matches!(model.predict(&ds), Err(MolbenchError::NotFitted)));
    }

    #[test]
    fn test_corrupted_tree_rejected() {
        let mut state = ModelState::new("rf", 1);
        let tree = DecisionTree {
            feature: vec![0],
            threshold: vec![0.5],
            left: vec![1],
            right: vec![2],
            value: vec![0.0],
        };
        tree.save(0, &mut state);
        let err = DecisionTree::load(0, &state, 1).unwrap_err();
        assert!(err.is_load());
    }
}
