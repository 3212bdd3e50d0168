//! Benchmark sweep configuration.
//!
//! A sweep trains one model family over a list of datasets and a list of
//! hyperparameter sets. Configs are read from JSON; every field has a default
//! so a partial file works.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use molbench_core::{HyperParams, ModelFamily, MolbenchError, Result};
use molbench_data::{DatasetName, Splitter};
use molbench_models::{Aggregation, Metric, MetricKind, DEFAULT_MAX_TO_KEEP};

/// On-disk layout of the results file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsFormat {
    /// Headerless append-only CSV lines, one block per run.
    #[default]
    LegacyCsv,
    /// One JSON object per run.
    JsonLines,
}

impl ResultsFormat {
    /// File name of the results file under the output directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::LegacyCsv => "results.csv",
            Self::JsonLines => "results.jsonl",
        }
    }
}

/// Working directory used when none is configured:
/// `/tmp/benchmark_test_<YYYY_MM_DD>`.
pub fn default_base_dir() -> PathBuf {
    PathBuf::from(
        chrono::Local::now()
            .format("/tmp/benchmark_test_%Y_%m_%d")
            .to_string(),
    )
}

/// Configuration of one benchmark sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Dataset names, or `all`.
    pub datasets: Vec<String>,
    /// Model family trained for every dataset.
    pub model: ModelFamily,
    /// Hyperparameter sets; empty means the family defaults.
    pub hyperparams: Vec<HyperParams>,
    /// Seed of every training context.
    pub seed: u64,
    /// Directory holding the raw `<dataset>.csv[.gz]` files.
    pub data_dir: PathBuf,
    /// Featurized dataset cache. Disabled when unset.
    pub cache_dir: Option<PathBuf>,
    /// Working directory for model directories.
    pub base_dir: PathBuf,
    /// Directory of the results file. Kept outside `base_dir` by default so
    /// cleaning the working directory never drops earlier results.
    pub out_path: PathBuf,
    /// Remove and recreate `base_dir` before the sweep.
    pub clean_base_dir: bool,
    /// Results file layout.
    pub results_format: ResultsFormat,
    /// Metric reported for train and valid. Must be mean-aggregated, since each
    /// split is recorded as a single value.
    pub metric: Metric,
    /// Row assignment to splits.
    pub splitter: Splitter,
    /// Save every fitted model into its directory.
    pub save_models: bool,
    /// Checkpoints kept per model directory.
    pub max_to_keep: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            datasets: vec![DatasetName::Muv.to_string()],
            model: ModelFamily::MultitaskDnn,
            hyperparams: Vec::new(),
            seed: 123,
            data_dir: PathBuf::from("./datasets"),
            cache_dir: None,
            base_dir: default_base_dir(),
            out_path: PathBuf::from("/tmp"),
            clean_base_dir: true,
            results_format: ResultsFormat::default(),
            metric: Metric::mean(MetricKind::RocAuc),
            splitter: Splitter::default(),
            save_models: false,
            max_to_keep: DEFAULT_MAX_TO_KEEP,
        }
    }
}

impl BenchmarkConfig {
    /// Reads a JSON config.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| MolbenchError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), "Loaded benchmark config");
        Ok(config)
    }

    /// Sets the dataset selectors.
    pub fn with_datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the model family and clears the hyperparameter sets.
    pub fn with_model(mut self, model: ModelFamily) -> Self {
        self.model = model;
        self.hyperparams.clear();
        self
    }

    /// Adds a hyperparameter set.
    pub fn with_hyperparams(mut self, hyperparams: HyperParams) -> Self {
        self.hyperparams.push(hyperparams);
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the raw data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Enables the feature cache.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Sets the working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Sets the results directory.
    pub fn with_out_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_path = dir.into();
        self
    }

    /// Sets the results layout.
    pub fn with_results_format(mut self, format: ResultsFormat) -> Self {
        self.results_format = format;
        self
    }

    /// Enables saving fitted models.
    pub fn with_save_models(mut self, save: bool) -> Self {
        self.save_models = save;
        self
    }

    /// Path of the results file.
    pub fn results_path(&self) -> PathBuf {
        self.out_path.join(self.results_format.file_name())
    }

    /// Model directory for one dataset: `<base_dir>/<dataset>/model_<family>`.
    pub fn model_dir(&self, dataset: DatasetName) -> PathBuf {
        self.base_dir
            .join(dataset.as_str())
            .join(format!("model_{}", self.model.key()))
    }

    /// Hyperparameter sets of the sweep, in run order.
    pub fn hyperparam_sets(&self) -> Vec<HyperParams> {
        if self.hyperparams.is_empty() {
            vec![HyperParams::default_for(self.model)]
        } else {
            self.hyperparams.clone()
        }
    }

    /// Checks the config and expands the dataset selectors.
    ///
    /// Unknown datasets, hyperparameters of another family, invalid
    /// hyperparameters and a per-task metric are configuration errors.
    pub fn validate(&self) -> Result<Vec<DatasetName>> {
        if self.datasets.is_empty() {
            return Err(MolbenchError::config("no datasets selected"));
        }
        let mut datasets = Vec::new();
        for selector in &self.datasets {
            for name in DatasetName::expand(selector)? {
                if !datasets.contains(&name) {
                    datasets.push(name);
                }
            }
        }
        for (i, hp) in self.hyperparams.iter().enumerate() {
            if hp.family() != self.model {
                return Err(MolbenchError::config(format!(
                    "hyperparameter set {i} is for {} but the sweep trains {}",
                    hp.family(),
                    self.model
                )));
            }
            hp.validate()?;
        }
        if self.max_to_keep == 0 {
            return Err(MolbenchError::config("max_to_keep must be at least 1"));
        }
        if self.metric.aggregation != Aggregation::Mean {
            return Err(MolbenchError::config(format!(
                "sweep metric {} must use mean aggregation",
                self.metric
            )));
        }
        if !(0.0..=1.0).contains(&self.metric.threshold) {
            return Err(MolbenchError::config(format!(
                "metric threshold {} is outside [0, 1]",
                self.metric.threshold
            )));
        }
        Ok(datasets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molbench_core::{DnnParams, ForestParams};

    #[test]
    fn test_default_sweep() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.validate().unwrap(), vec![DatasetName::Muv]);
        assert_eq!(config.model, ModelFamily::MultitaskDnn);
        assert_eq!(config.seed, 123);
        assert_eq!(config.hyperparam_sets().len(), 1);
        assert!(config
            .base_dir
            .to_string_lossy()
            .starts_with("/tmp/benchmark_test_"));
        assert_eq!(config.results_path(), PathBuf::from("/tmp/results.csv"));
        assert!(!config.results_path().starts_with(&config.base_dir));
    }

    #[test]
    fn test_all_expands_without_duplicates() {
        let config = BenchmarkConfig::default().with_datasets(["muv", "all"]);
        let datasets = config.validate().unwrap();
        assert_eq!(datasets.len(), 5);
        assert_eq!(datasets[0], DatasetName::Muv);
        assert!(!datasets.contains(&DatasetName::Nci));
    }

    #[test]
    fn test_rejects_unknown_dataset_and_foreign_params() {
        let config = BenchmarkConfig::default().with_datasets(["qm9"]);
        assert!(config.validate().unwrap_err().is_config());

        let config = BenchmarkConfig::default()
            .with_model(ModelFamily::MultitaskDnn)
            .with_hyperparams(HyperParams::Forest(ForestParams::default()));
        assert!(config.validate().unwrap_err().is_config());

        let config = BenchmarkConfig::default().with_hyperparams(HyperParams::Dnn(DnnParams {
            layer_sizes: vec![100, 100],
            dropouts: vec![0.25],
            ..DnnParams::default()
        }));
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_rejects_per_task_metric() {
        let json = r#"{"metric": {"kind": "accuracy", "aggregation": "per_task"}}"#;
        let config: BenchmarkConfig = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("accuracy_score"));

        let json = r#"{"metric": {"kind": "accuracy"}}"#;
        let config: BenchmarkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.metric, Metric::mean(MetricKind::Accuracy));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "datasets": ["tox21"],
            "model": "rf",
            "hyperparams": [{"model": "rf", "n_estimators": 10}],
            "results_format": "json_lines"
        }"#;
        let config: BenchmarkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model, ModelFamily::RandomForest);
        assert_eq!(config.results_format, ResultsFormat::JsonLines);
        assert_eq!(config.seed, 123);
        match &config.hyperparams[0] {
            HyperParams::Forest(p) => assert_eq!(p.n_estimators, 10),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            config.model_dir(DatasetName::Tox21),
            config.base_dir.join("tox21").join("model_rf")
        );
    }
}
