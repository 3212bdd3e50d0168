//! Typed hyperparameter configurations, one per model family.
//!
//! A configuration is validated once before a run and then consumed read-only.
//! In serialized form the family is carried by a `model` tag so a sweep file can
//! list heterogeneous configurations:
//!
//! ```json
//! {"model": "tf", "layer_sizes": [1000], "dropouts": [0.25], "learning_rate": 0.001}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MolbenchError, Result};
use crate::family::ModelFamily;

/// Hyperparameters for the multitask dense network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnnParams {
    /// Width of each hidden layer.
    pub layer_sizes: Vec<usize>,
    /// Dropout rate after each hidden layer; one entry per layer.
    pub dropouts: Vec<f32>,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Minibatch size.
    pub batch_size: usize,
    /// Epochs run by a plain `fit`.
    pub nb_epoch: usize,
    /// L2 penalty on weights.
    pub weight_decay: f32,
    /// Number of output classes per task. Only binary tasks are supported.
    pub n_classes: usize,
}

impl Default for DnnParams {
    fn default() -> Self {
        Self {
            layer_sizes: vec![1000],
            dropouts: vec![0.25],
            learning_rate: 0.001,
            batch_size: 50,
            nb_epoch: 10,
            weight_decay: 0.0,
            n_classes: 2,
        }
    }
}

impl DnnParams {
    /// Sets the dropout of every hidden layer to `rate`.
    pub fn with_uniform_dropout(mut self, rate: f32) -> Self {
        self.dropouts = vec![rate; self.layer_sizes.len()];
        self
    }

    /// Sets the number of epochs.
    pub fn with_nb_epoch(mut self, nb_epoch: usize) -> Self {
        self.nb_epoch = nb_epoch;
        self
    }

    fn validate(&self) -> Result<()> {
        validate_layers("layer_sizes", &self.layer_sizes, "dropouts", &self.dropouts)?;
        validate_training(self.learning_rate, self.batch_size, self.nb_epoch)?;
        if self.weight_decay < 0.0 {
            return Err(MolbenchError::config("weight_decay must be non-negative"));
        }
        validate_classes(self.n_classes)
    }
}

/// Hyperparameters for the robust multitask network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustParams {
    /// Width of each shared hidden layer.
    pub layer_sizes: Vec<usize>,
    /// Dropout after each shared layer.
    pub dropouts: Vec<f32>,
    /// Width of each per-task bypass layer.
    pub bypass_layer_sizes: Vec<usize>,
    /// Dropout after each bypass layer.
    pub bypass_dropouts: Vec<f32>,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Minibatch size.
    pub batch_size: usize,
    /// Epochs run by a plain `fit`.
    pub nb_epoch: usize,
}

impl Default for RobustParams {
    fn default() -> Self {
        Self {
            layer_sizes: vec![500],
            dropouts: vec![0.5],
            bypass_layer_sizes: vec![100],
            bypass_dropouts: vec![0.5],
            learning_rate: 0.001,
            batch_size: 50,
            nb_epoch: 10,
        }
    }
}

impl RobustParams {
    fn validate(&self) -> Result<()> {
        validate_layers("layer_sizes", &self.layer_sizes, "dropouts", &self.dropouts)?;
        validate_layers(
            "bypass_layer_sizes",
            &self.bypass_layer_sizes,
            "bypass_dropouts",
            &self.bypass_dropouts,
        )?;
        validate_training(self.learning_rate, self.batch_size, self.nb_epoch)
    }
}

/// Penalty applied to logistic regression weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyType {
    /// Lasso penalty.
    L1,
    /// Ridge penalty.
    L2,
}

/// Hyperparameters for per-task logistic regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRegParams {
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Penalty strength.
    pub penalty: f32,
    /// Penalty kind.
    pub penalty_type: PenaltyType,
    /// Minibatch size.
    pub batch_size: usize,
    /// Epochs run by a plain `fit`.
    pub nb_epoch: usize,
}

impl Default for LogRegParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            penalty: 0.05,
            penalty_type: PenaltyType::L1,
            batch_size: 50,
            nb_epoch: 10,
        }
    }
}

impl LogRegParams {
    fn validate(&self) -> Result<()> {
        if self.penalty < 0.0 {
            return Err(MolbenchError::config("penalty must be non-negative"));
        }
        validate_training(self.learning_rate, self.batch_size, self.nb_epoch)
    }
}

/// Hyperparameters for the graph convolution network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConvParams {
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Output width of each graph convolution.
    pub n_filters: usize,
    /// Width of the dense layer before the gather step.
    pub n_fully_connected_nodes: usize,
    /// Molecules per minibatch.
    pub batch_size: usize,
    /// Epochs run by a plain `fit`.
    pub nb_epoch: usize,
}

impl Default for GraphConvParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            n_filters: 64,
            n_fully_connected_nodes: 128,
            batch_size: 50,
            nb_epoch: 10,
        }
    }
}

impl GraphConvParams {
    fn validate(&self) -> Result<()> {
        if self.n_filters == 0 || self.n_fully_connected_nodes == 0 {
            return Err(MolbenchError::config(
                "n_filters and n_fully_connected_nodes must be positive",
            ));
        }
        validate_training(self.learning_rate, self.batch_size, self.nb_epoch)
    }
}

/// How many features each split considers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Square root of the feature count.
    Sqrt,
    /// Base-2 logarithm of the feature count.
    Log2,
    /// Every feature.
    All,
    /// Fixed count.
    Count(usize),
}

impl MaxFeatures {
    /// Resolves to a concrete count for `n_features` columns (at least one).
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
            Self::Count(k) => (*k).min(n_features),
        };
        n.max(1)
    }
}

/// Hyperparameters for the random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Feature subsampling per split.
    pub max_features: MaxFeatures,
    /// Maximum tree depth; unbounded when absent.
    pub max_depth: Option<usize>,
    /// Minimum samples needed to split a node.
    pub min_samples_split: usize,
    /// Reweight classes inversely to their frequency.
    pub balanced_class_weight: bool,
    /// Draw a bootstrap sample per tree.
    pub bootstrap: bool,
    /// Worker threads for tree construction; all cores when absent.
    pub n_jobs: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            max_features: MaxFeatures::Sqrt,
            max_depth: None,
            min_samples_split: 2,
            balanced_class_weight: true,
            bootstrap: true,
            n_jobs: None,
        }
    }
}

impl ForestParams {
    /// Sets the number of trees.
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(MolbenchError::config("n_estimators must be positive"));
        }
        if self.min_samples_split < 2 {
            return Err(MolbenchError::config("min_samples_split must be at least 2"));
        }
        if self.n_jobs == Some(0) {
            return Err(MolbenchError::config("n_jobs must be positive when set"));
        }
        Ok(())
    }
}

/// A hyperparameter configuration for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum HyperParams {
    /// Multitask dense network.
    #[serde(rename = "tf")]
    Dnn(DnnParams),
    /// Robust multitask network.
    #[serde(rename = "tf_robust")]
    Robust(RobustParams),
    /// Logistic regression.
    #[serde(rename = "logreg")]
    LogReg(LogRegParams),
    /// Graph convolution network.
    #[serde(rename = "graphconv")]
    GraphConv(GraphConvParams),
    /// Random forest.
    #[serde(rename = "rf")]
    Forest(ForestParams),
}

impl HyperParams {
    /// The benchmark defaults for a family.
    pub fn default_for(family: ModelFamily) -> Self {
        match family {
            ModelFamily::RandomForest => Self::Forest(ForestParams::default()),
            ModelFamily::MultitaskDnn => Self::Dnn(DnnParams::default()),
            ModelFamily::RobustMultitask => Self::Robust(RobustParams::default()),
            ModelFamily::LogisticRegression => Self::LogReg(LogRegParams::default()),
            ModelFamily::GraphConv => Self::GraphConv(GraphConvParams::default()),
        }
    }

    /// Family these hyperparameters configure.
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::Dnn(_) => ModelFamily::MultitaskDnn,
            Self::Robust(_) => ModelFamily::RobustMultitask,
            Self::LogReg(_) => ModelFamily::LogisticRegression,
            Self::GraphConv(_) => ModelFamily::GraphConv,
            Self::Forest(_) => ModelFamily::RandomForest,
        }
    }

    /// Default epoch count for a plain `fit`, if the family trains in epochs.
    pub fn nb_epoch(&self) -> Option<usize> {
        match self {
            Self::Dnn(p) => Some(p.nb_epoch),
            Self::Robust(p) => Some(p.nb_epoch),
            Self::LogReg(p) => Some(p.nb_epoch),
            Self::GraphConv(p) => Some(p.nb_epoch),
            Self::Forest(_) => None,
        }
    }

    /// Checks value ranges and that per-layer lists line up.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Dnn(p) => p.validate(),
            Self::Robust(p) => p.validate(),
            Self::LogReg(p) => p.validate(),
            Self::GraphConv(p) => p.validate(),
            Self::Forest(p) => p.validate(),
        }
    }
}

fn validate_layers(
    sizes_name: &str,
    sizes: &[usize],
    dropouts_name: &str,
    dropouts: &[f32],
) -> Result<()> {
    if sizes.is_empty() {
        return Err(MolbenchError::config(format!(
            "{sizes_name} must name at least one layer"
        )));
    }
    if let Some(i) = sizes.iter().position(|&s| s == 0) {
        return Err(MolbenchError::config(format!(
            "{sizes_name}[{i}] has zero width"
        )));
    }
    if sizes.len() != dropouts.len() {
        return Err(MolbenchError::config(format!(
            "{dropouts_name} has {} entries but {sizes_name} has {}; give one dropout per layer",
            dropouts.len(),
            sizes.len()
        )));
    }
    if let Some(d) = dropouts.iter().find(|&&d| !(0.0..1.0).contains(&d)) {
        return Err(MolbenchError::config(format!(
            "{dropouts_name} entry {d} is outside [0, 1)"
        )));
    }
    Ok(())
}

fn validate_training(learning_rate: f32, batch_size: usize, nb_epoch: usize) -> Result<()> {
    if !(learning_rate > 0.0 && learning_rate.is_finite()) {
        return Err(MolbenchError::config("learning_rate must be positive"));
    }
    if batch_size == 0 {
        return Err(MolbenchError::config("batch_size must be positive"));
    }
    if nb_epoch == 0 {
        return Err(MolbenchError::config("nb_epoch must be positive"));
    }
    Ok(())
}

fn validate_classes(n_classes: usize) -> Result<()> {
    if n_classes != 2 {
        return Err(MolbenchError::config(format!(
            "n_classes = {n_classes} is not supported; tasks are binary"
        )));
    }
    Ok(())
}
