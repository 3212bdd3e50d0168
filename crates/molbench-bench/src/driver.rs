//! The benchmark sweep: datasets × hyperparameter sets.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use molbench_core::{HyperParams, MolbenchError, Result, TrainingContext};
use molbench_data::{DatasetLoader, DatasetName, FeatureCache, LoadedDataset};
use molbench_models::{ArchitectureRegistry, FitOptions, Model, ModelBuilder};

use crate::config::BenchmarkConfig;
use crate::results::{ResultsWriter, RunRecord};

/// Where a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading or featurizing the dataset.
    Load,
    /// Constructing the model adapter.
    Build,
    /// Training.
    Fit,
    /// Saving the fitted model.
    Save,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Build => "build",
            Self::Fit => "fit",
            Self::Save => "save",
        })
    }
}

/// A failure the sweep recorded and moved past.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFailure {
    /// Dataset being processed.
    pub dataset: String,
    /// Hyperparameter set index; absent for load failures.
    pub run: Option<usize>,
    /// Where it failed.
    pub stage: Stage,
    /// Error message.
    pub message: String,
}

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Records appended to the results file, in order.
    pub records: Vec<RunRecord>,
    /// Failures that were logged and skipped.
    pub failures: Vec<SweepFailure>,
}

impl SweepSummary {
    /// True if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, dataset: DatasetName, run: Option<usize>, stage: Stage, err: &MolbenchError) {
        tracing::error!(dataset = %dataset, run, stage = %stage, error = %err, "Run failed");
        self.failures.push(SweepFailure {
            dataset: dataset.to_string(),
            run,
            stage,
            message: err.to_string(),
        });
    }
}

/// Runs a [`BenchmarkConfig`].
///
/// For every dataset: load once, then for every hyperparameter set build a
/// model in `<base_dir>/<dataset>/model_<family>`, fit it inside a fresh
/// [`TrainingContext`], score train and valid, and append a record. A dataset
/// that fails to load is skipped. A model that fails to build or fit skips
/// that set. A split that cannot be scored is written as `nan`.
#[derive(Debug)]
pub struct BenchmarkDriver {
    config: BenchmarkConfig,
    builder: ModelBuilder,
}

impl BenchmarkDriver {
    /// Driver using the built-in architectures.
    pub fn new(config: BenchmarkConfig) -> Self {
        Self::with_registry(config, Arc::new(ArchitectureRegistry::with_defaults()))
    }

    /// Driver whose models reload through `registry`.
    pub fn with_registry(config: BenchmarkConfig, registry: Arc<ArchitectureRegistry>) -> Self {
        let builder = ModelBuilder::new(registry).with_max_to_keep(config.max_to_keep);
        Self { config, builder }
    }

    /// The sweep configuration.
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    fn loader(&self) -> DatasetLoader {
        let loader = DatasetLoader::new(&self.config.data_dir).with_splitter(self.config.splitter);
        match &self.config.cache_dir {
            Some(dir) => loader.with_cache(FeatureCache::new(dir)),
            None => loader,
        }
    }

    fn prepare_base_dir(&self) -> Result<()> {
        let base = &self.config.base_dir;
        if self.config.clean_base_dir && base.exists() {
            tracing::info!(dir = %base.display(), "Removing previous working directory");
            std::fs::remove_dir_all(base).map_err(|e| MolbenchError::io(base, e))?;
        }
        std::fs::create_dir_all(base).map_err(|e| MolbenchError::io(base, e))
    }

    /// Runs the sweep.
    ///
    /// Configuration errors and failures to write the results file abort the
    /// sweep. Everything else is recorded in the returned summary.
    pub fn run(&self) -> Result<SweepSummary> {
        let datasets = self.config.validate()?;
        let hyperparams = self.config.hyperparam_sets();
        self.prepare_base_dir()?;

        let loader = self.loader();
        let writer = ResultsWriter::new(self.config.results_path(), self.config.results_format);
        tracing::info!(
            model = %self.config.model,
            datasets = datasets.len(),
            configs = hyperparams.len(),
            results = %writer.path().display(),
            "Starting benchmark sweep"
        );

        let mut summary = SweepSummary::default();
        for dataset in datasets {
            let start = Instant::now();
            let loaded = match loader.load(dataset, self.config.model.featurizer()) {
                Ok(loaded) => loaded,
                Err(err) => {
                    summary.fail(dataset, None, Stage::Load, &err);
                    continue;
                }
            };
            tracing::info!(
                dataset = %dataset,
                seconds = start.elapsed().as_secs_f64(),
                train = loaded.train.len(),
                valid = loaded.valid.len(),
                "Loaded dataset"
            );

            let model_dir = self.config.model_dir(dataset);
            for (run, hp) in hyperparams.iter().enumerate() {
                let label = format!("{dataset}/{}/{run}", self.config.model);
                let outcome = TrainingContext::scoped(self.config.seed, label, |ctx| {
                    self.run_one(run, &loaded, hp, &model_dir, ctx)
                });
                match outcome {
                    Ok(record) => {
                        writer.append(&record)?;
                        summary.records.push(record);
                    }
                    Err((stage, err)) => summary.fail(dataset, Some(run), stage, &err),
                }
            }
        }
        tracing::info!(
            completed = summary.records.len(),
            failed = summary.failures.len(),
            "Benchmark sweep finished"
        );
        Ok(summary)
    }

    fn run_one(
        &self,
        run: usize,
        loaded: &LoadedDataset,
        hp: &HyperParams,
        model_dir: &Path,
        ctx: &mut TrainingContext,
    ) -> std::result::Result<RunRecord, (Stage, MolbenchError)> {
        let family = self.config.model;
        let mut model = self
            .builder
            .build(family, hp, loaded.tasks.clone(), model_dir)
            .map_err(|e| (Stage::Build, e))?;

        let start = Instant::now();
        model
            .fit(&loaded.train, &FitOptions::default(), ctx)
            .map_err(|e| (Stage::Fit, e))?;
        tracing::info!(
            dataset = %loaded.name,
            run,
            seconds = start.elapsed().as_secs_f64(),
            "Fitted model"
        );

        let train = self.score(model.as_ref(), loaded, Split::Train);
        let valid = self.score(model.as_ref(), loaded, Split::Valid);
        let elapsed = start.elapsed().as_secs_f64();

        if self.config.save_models {
            model.save().map_err(|e| (Stage::Save, e))?;
        }

        Ok(RunRecord {
            run,
            dataset: loaded.name.to_string(),
            model: family.result_label().to_string(),
            metric: self.config.metric.key(),
            train,
            valid,
            time_for_running: elapsed,
        })
    }

    fn score(&self, model: &dyn Model, loaded: &LoadedDataset, split: Split) -> Option<f64> {
        let dataset = match split {
            Split::Train => &loaded.train,
            Split::Valid => &loaded.valid,
        };
        let metric = self.config.metric;
        match model.evaluate(dataset, &[metric], &loaded.transformers) {
            Ok(scores) => {
                let value = scores.primary(&metric.key());
                match value {
                    Some(v) => tracing::info!(
                        dataset = %loaded.name,
                        split = split.as_str(),
                        score = v,
                        "Evaluated"
                    ),
                    None => tracing::warn!(
                        dataset = %loaded.name,
                        split = split.as_str(),
                        metric = %metric,
                        "Metric has no single value; recording nan"
                    ),
                }
                value
            }
            Err(err) => {
                tracing::warn!(
                    dataset = %loaded.name,
                    split = split.as_str(),
                    error = %err,
                    "Evaluation failed; recording nan"
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Split {
    Train,
    Valid,
}

impl Split {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Valid => "valid",
        }
    }
}
