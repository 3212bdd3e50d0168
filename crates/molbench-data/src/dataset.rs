//! The in-memory dataset type.
//!
//! A [`Dataset`] bundles features, labels, weights, sample ids and task names.
//! Shapes are checked once in [`Dataset::new`]; afterwards the value is never
//! mutated. Splits, transforms and per-task views all return new datasets.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use molbench_core::{MolbenchError, Result};

/// Per-molecule graph: one feature row per atom plus adjacency lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MolGraph {
    /// Atom feature matrix, atoms x features.
    pub atom_features: Array2<f32>,
    /// Neighbor indices for each atom.
    pub adjacency: Vec<Vec<usize>>,
}

impl MolGraph {
    /// Number of atoms.
    pub fn n_atoms(&self) -> usize {
        self.atom_features.nrows()
    }

    /// Width of the atom feature rows.
    pub fn n_features(&self) -> usize {
        self.atom_features.ncols()
    }
}

/// Featurized inputs for every sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Features {
    /// Fixed-width feature vectors, samples x features.
    Dense(Array2<f32>),
    /// One molecular graph per sample.
    Graph(Vec<MolGraph>),
}

impl Features {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(x) => x.nrows(),
            Self::Graph(g) => g.len(),
        }
    }

    /// Returns true when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature width: columns for dense input, atom features for graphs.
    pub fn n_features(&self) -> usize {
        match self {
            Self::Dense(x) => x.ncols(),
            Self::Graph(g) => g.first().map(MolGraph::n_features).unwrap_or(0),
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Dense(x) => Self::Dense(x.select(Axis(0), indices)),
            Self::Graph(g) => Self::Graph(indices.iter().map(|&i| g[i].clone()).collect()),
        }
    }
}

/// An immutable labelled dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    x: Features,
    y: Array2<f32>,
    w: Array2<f32>,
    ids: Vec<String>,
    tasks: Vec<String>,
}

impl Dataset {
    /// Creates a dataset, checking that every component agrees on shape.
    pub fn new(
        x: Features,
        y: Array2<f32>,
        w: Array2<f32>,
        ids: Vec<String>,
        tasks: Vec<String>,
    ) -> Result<Self> {
        let n = x.len();
        if y.nrows() != n || w.nrows() != n || ids.len() != n {
            return Err(MolbenchError::config(format!(
                "sample counts disagree: x={}, y={}, w={}, ids={}",
                n,
                y.nrows(),
                w.nrows(),
                ids.len()
            )));
        }
        if y.dim() != w.dim() {
            return Err(MolbenchError::config(format!(
                "labels {:?} and weights {:?} differ in shape",
                y.dim(),
                w.dim()
            )));
        }
        if tasks.len() != y.ncols() {
            return Err(MolbenchError::config(format!(
                "{} task names for {} label columns",
                tasks.len(),
                y.ncols()
            )));
        }
        if let Features::Graph(graphs) = &x {
            for (i, g) in graphs.iter().enumerate() {
                if g.adjacency.len() != g.n_atoms() {
                    return Err(MolbenchError::config(format!(
                        "graph {i} has {} atoms but {} adjacency lists",
                        g.n_atoms(),
                        g.adjacency.len()
                    )));
                }
            }
        }
        Ok(Self {
            x,
            y,
            w,
            ids,
            tasks,
        })
    }

    /// Builds a dense dataset with unit weights and index ids.
    pub fn from_dense(x: Array2<f32>, y: Array2<f32>, tasks: Vec<String>) -> Result<Self> {
        let w = Array2::ones(y.dim());
        let ids = (0..x.nrows()).map(|i| i.to_string()).collect();
        Self::new(Features::Dense(x), y, w, ids, tasks)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Number of tasks.
    pub fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Input feature width.
    pub fn n_features(&self) -> usize {
        self.x.n_features()
    }

    /// Features.
    pub fn x(&self) -> &Features {
        &self.x
    }

    /// Dense features, if this dataset holds them.
    pub fn dense(&self) -> Option<&Array2<f32>> {
        match &self.x {
            Features::Dense(x) => Some(x),
            Features::Graph(_) => None,
        }
    }

    /// Graph features, if this dataset holds them.
    pub fn graphs(&self) -> Option<&[MolGraph]> {
        match &self.x {
            Features::Graph(g) => Some(g),
            Features::Dense(_) => None,
        }
    }

    /// Labels, samples x tasks.
    pub fn y(&self) -> &Array2<f32> {
        &self.y
    }

    /// Weights, samples x tasks.
    pub fn w(&self) -> &Array2<f32> {
        &self.w
    }

    /// Sample ids.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Task names.
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(indices),
            y: self.y.select(Axis(0), indices),
            w: self.w.select(Axis(0), indices),
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            tasks: self.tasks.clone(),
        }
    }

    /// Single-task view of column `task`, sharing the features.
    pub fn task_view(&self, task: usize) -> Result<Self> {
        if task >= self.n_tasks() {
            return Err(MolbenchError::config(format!(
                "task index {task} out of range for {} tasks",
                self.n_tasks()
            )));
        }
        let col = |a: &Array2<f32>| a.select(Axis(1), &[task]);
        Ok(Self {
            x: self.x.clone(),
            y: col(&self.y),
            w: col(&self.w),
            ids: self.ids.clone(),
            tasks: vec![self.tasks[task].clone()],
        })
    }

    /// Copy of this dataset with replaced weights.
    pub fn with_weights(&self, w: Array2<f32>) -> Result<Self> {
        Self::new(
            self.x.clone(),
            self.y.clone(),
            w,
            self.ids.clone(),
            self.tasks.clone(),
        )
    }

    /// Returns true if every weight in column `task` is zero.
    pub fn task_is_unweighted(&self, task: usize) -> bool {
        self.w.column(task).iter().all(|&v| v == 0.0)
    }

    /// Index ranges of consecutive minibatches of `batch_size` rows.
    pub fn batch_indices(&self, batch_size: usize) -> Vec<Vec<usize>> {
        let size = batch_size.max(1);
        (0..self.len())
            .collect::<Vec<_>>()
            .chunks(size)
            .map(<[usize]>::to_vec)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small() -> Dataset {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let y = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
        Dataset::from_dense(x, y, vec!["a".into(), "b".into()]).unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = Dataset::from_dense(
            Array2::zeros((3, 2)),
            Array2::zeros((2, 1)),
            vec!["t".into()],
        )
        .unwrap_err();
        assert!(err.is_config());

        let err = Dataset::from_dense(
            Array2::zeros((3, 2)),
            Array2::zeros((3, 2)),
            vec!["t".into()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("task names"));
    }

    #[test]
    fn test_select_and_task_view() {
        let ds = small();
        let sub = ds.select(&[2, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.ids(), &["2".to_string(), "0".to_string()]);
        assert_eq!(sub.dense().unwrap()[[0, 1]], 1.0);

        let view = ds.task_view(1).unwrap();
        assert_eq!(view.tasks(), &["b".to_string()]);
        assert_eq!(view.y().column(0).to_vec(), vec![0.0, 1.0, 0.0]);
        assert!(ds.task_view(2).is_err());
    }

    #[test]
    fn test_unweighted_task_detection() {
        let ds = small();
        let mut w = ds.w().clone();
        w.column_mut(1).fill(0.0);
        let ds = ds.with_weights(w).unwrap();
        assert!(!ds.task_is_unweighted(0));
        assert!(ds.task_is_unweighted(1));
    }

    #[test]
    fn test_batch_indices_cover_all_rows() {
        let ds = small();
        let batches = ds.batch_indices(2);
        assert_eq!(batches, vec![vec![0, 1], vec![2]]);
    }
}
