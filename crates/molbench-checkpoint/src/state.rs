//! Model state representation for checkpointing.
//!
//! A [`ModelState`] is a format-neutral snapshot of one fitted model: named
//! float tensors for weights, named integer arrays for discrete structure
//! (tree topology), optimizer moments and free-form metadata.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{CheckpointError, Result};

/// Current checkpoint format version.
pub const STATE_VERSION: u32 = 1;

/// A dense tensor flattened in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    /// Dimensions.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

impl TensorState {
    /// Captures a matrix.
    pub fn from_array2(array: &Array2<f32>) -> Self {
        Self {
            shape: vec![array.nrows(), array.ncols()],
            data: array.iter().copied().collect(),
        }
    }

    /// Captures a vector.
    pub fn from_array1(array: &Array1<f32>) -> Self {
        Self {
            shape: vec![array.len()],
            data: array.to_vec(),
        }
    }

    /// Rebuilds a matrix, checking the recorded shape.
    pub fn to_array2(&self) -> Result<Array2<f32>> {
        match self.shape.as_slice() {
            &[rows, cols] => Array2::from_shape_vec((rows, cols), self.data.clone())
                .map_err(|e| CheckpointError::Corrupted(e.to_string())),
            other => Err(CheckpointError::Corrupted(format!(
                "expected a 2-d tensor, found shape {other:?}"
            ))),
        }
    }

    /// Rebuilds a vector, checking the recorded shape.
    pub fn to_array1(&self) -> Result<Array1<f32>> {
        match self.shape.as_slice() {
            &[len] if len == self.data.len() => Ok(Array1::from(self.data.clone())),
            other => Err(CheckpointError::Corrupted(format!(
                "expected a 1-d tensor of {} values, found shape {other:?}",
                self.data.len()
            ))),
        }
    }
}

/// Adam moments for a set of named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Optimizer name, e.g. `"adam"`.
    pub optimizer_type: String,
    /// Learning rate at save time.
    pub learning_rate: f64,
    /// Number of updates applied.
    pub step: u64,
    /// First moment estimates per parameter.
    pub first_moments: BTreeMap<String, Vec<f32>>,
    /// Second moment estimates per parameter.
    pub second_moments: BTreeMap<String, Vec<f32>>,
}

impl OptimizerState {
    /// Creates an empty optimizer state.
    pub fn new(optimizer_type: impl Into<String>, learning_rate: f64, step: u64) -> Self {
        Self {
            optimizer_type: optimizer_type.into(),
            learning_rate,
            step,
            first_moments: BTreeMap::new(),
            second_moments: BTreeMap::new(),
        }
    }
}

/// Complete state of one fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Version of the checkpoint format.
    pub version: u32,

    /// Model family key, e.g. `"tf"`.
    pub family: String,

    /// Number of completed training epochs.
    pub global_step: u64,

    /// Timestamp when the state was captured (Unix epoch seconds).
    pub timestamp: u64,

    /// Float parameters keyed by name.
    pub tensors: BTreeMap<String, TensorState>,

    /// Integer arrays keyed by name.
    pub int_arrays: BTreeMap<String, Vec<i64>>,

    /// Optimizer state, if the model trains with one.
    pub optimizer: Option<OptimizerState>,

    /// Additional metadata.
    pub metadata: BTreeMap<String, String>,
}

impl ModelState {
    /// Creates an empty state for `family` at `global_step`.
    pub fn new(family: impl Into<String>, global_step: u64) -> Self {
        Self {
            version: STATE_VERSION,
            family: family.into(),
            global_step,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            tensors: BTreeMap::new(),
            int_arrays: BTreeMap::new(),
            optimizer: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a matrix parameter.
    pub fn add_matrix(&mut self, name: impl Into<String>, value: &Array2<f32>) {
        self.tensors
            .insert(name.into(), TensorState::from_array2(value));
    }

    /// Adds a vector parameter.
    pub fn add_vector(&mut self, name: impl Into<String>, value: &Array1<f32>) {
        self.tensors
            .insert(name.into(), TensorState::from_array1(value));
    }

    /// Adds an integer array.
    pub fn add_ints(&mut self, name: impl Into<String>, values: Vec<i64>) {
        self.int_arrays.insert(name.into(), values);
    }

    /// Sets a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Matrix parameter `name`.
    pub fn matrix(&self, name: &str) -> Result<Array2<f32>> {
        self.tensor(name)?.to_array2()
    }

    /// Vector parameter `name`.
    pub fn vector(&self, name: &str) -> Result<Array1<f32>> {
        self.tensor(name)?.to_array1()
    }

    /// Integer array `name`.
    pub fn ints(&self, name: &str) -> Result<&[i64]> {
        self.int_arrays
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CheckpointError::Corrupted(format!("missing integer array '{name}'")))
    }

    /// Metadata value `key`.
    pub fn metadata_value(&self, key: &str) -> Result<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CheckpointError::Corrupted(format!("missing metadata '{key}'")))
    }

    fn tensor(&self, name: &str) -> Result<&TensorState> {
        self.tensors
            .get(name)
            .ok_or_else(|| CheckpointError::Corrupted(format!("missing tensor '{name}'")))
    }

    /// Total number of stored float parameters.
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_model_state_new() {
        let state = ModelState::new("tf", 5);
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.family, "tf");
        assert_eq!(state.global_step, 5);
        assert!(state.tensors.is_empty());
        assert!(state.optimizer.is_none());
    }

    #[test]
    fn test_tensor_round_trip() {
        let mut state = ModelState::new("tf", 1);
        let w = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        state.add_matrix("layer0.w", &w);
        state.add_vector("layer0.b", &array![0.5, -0.5, 0.0]);
        assert_eq!(state.matrix("layer0.w").unwrap(), w);
        assert_eq!(state.vector("layer0.b").unwrap().len(), 3);
        assert_eq!(state.parameter_count(), 9);
    }

    #[test]
    fn test_missing_or_misshapen_tensor_is_corrupted() {
        let mut state = ModelState::new("tf", 1);
        assert!(matches!(
            state.matrix("nope"),
            Err(CheckpointError::Corrupted(_))
        ));
        state.tensors.insert(
            "bad".into(),
            TensorState {
                shape: vec![2, 2],
                data: vec![1.0],
            },
        );
        assert!(state.matrix("bad").is_err());
        assert!(state.vector("bad").is_err());
    }

    #[test]
    fn test_model_state_serialization() {
        let mut state = ModelState::new("rf", 100);
        state.set_metadata("test", "value");
        state.add_ints("tree0.feature", vec![3, -1, -1]);

        let json = serde_json::to_string(&state).unwrap();
        let restored: ModelState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.metadata_value("test").unwrap(), "value");
        assert_eq!(restored.ints("tree0.feature").unwrap(), &[3, -1, -1]);
    }
}
