//! Run command implementation
//!
//! Without a config file this runs the default sweep: `muv` with the multitask
//! network and its default hyperparameters, models under
//! `/tmp/benchmark_test_<date>` and results appended to `/tmp/results.csv`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use molbench_bench::{BenchmarkConfig, BenchmarkDriver, ResultsFormat};
use molbench_core::ModelFamily;
use molbench_data::FeatureCache;

use super::parse_family;

/// Run a benchmark sweep
///
/// # Example
///
/// ```bash
/// molbench run \
///     --config sweep.json \
///     --dataset tox21 --dataset sider \
///     --out-path ./results
/// ```
#[derive(Args, Debug, Clone)]
pub struct RunCommand {
    /// Sweep configuration file (JSON)
    #[arg(long, short = 'c', env = "MOLBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Dataset to run, or `all`; repeat for several
    #[arg(long = "dataset", short = 'd')]
    pub datasets: Vec<String>,

    /// Model family: rf, tf, tf_robust, logreg or graphconv
    #[arg(long, short = 'm', value_parser = parse_family)]
    pub model: Option<ModelFamily>,

    /// Directory holding `<dataset>.csv` or `<dataset>.csv.gz`
    #[arg(long, env = "MOLBENCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Cache directory for featurized datasets
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Working directory for model directories
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Directory of the results file
    #[arg(long)]
    pub out_path: Option<PathBuf>,

    /// Seed of every training run
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write one JSON object per run instead of the CSV blocks
    #[arg(long, default_value = "false")]
    pub json_lines: bool,

    /// Save every fitted model into its directory
    #[arg(long, default_value = "false")]
    pub save_models: bool,

    /// Keep the contents of the working directory
    #[arg(long, default_value = "false")]
    pub keep_base_dir: bool,

    /// Empty the feature cache before the sweep
    #[arg(long, default_value = "false")]
    pub clear_cache: bool,
}

impl RunCommand {
    /// Builds the sweep config: the file (or defaults), then flag overrides.
    pub fn to_config(&self) -> Result<BenchmarkConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from: {:?}", path);
                BenchmarkConfig::from_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => {
                warn!("No config file provided, using the default sweep");
                BenchmarkConfig::default()
            }
        };

        if !self.datasets.is_empty() {
            config = config.with_datasets(self.datasets.iter().cloned());
        }
        if let Some(model) = self.model {
            if model != config.model {
                config = config.with_model(model);
            }
        }
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(dir) = &self.cache_dir {
            config = config.with_cache_dir(dir);
        }
        if let Some(dir) = &self.base_dir {
            config = config.with_base_dir(dir);
        }
        if let Some(dir) = &self.out_path {
            config = config.with_out_path(dir);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if self.json_lines {
            config = config.with_results_format(ResultsFormat::JsonLines);
        }
        if self.save_models {
            config = config.with_save_models(true);
        }
        if self.keep_base_dir {
            config.clean_base_dir = false;
        }
        Ok(config)
    }

    /// Execute the run command
    pub fn run(&self) -> Result<()> {
        let config = self.to_config()?;
        if self.clear_cache {
            match &config.cache_dir {
                Some(dir) => {
                    let removed = FeatureCache::new(dir)
                        .clear()
                        .context("Failed to clear feature cache")?;
                    info!("Removed {} cached datasets from {:?}", removed, dir);
                }
                None => warn!("--clear-cache given but no cache directory is configured"),
            }
        }
        let results_path = config.results_path();
        info!(
            "Sweep: model={} datasets={:?} configs={}",
            config.model,
            config.datasets,
            config.hyperparam_sets().len()
        );

        let summary = BenchmarkDriver::new(config)
            .run()
            .context("Benchmark sweep failed")?;

        for failure in &summary.failures {
            warn!(
                "{} run {:?} failed at {}: {}",
                failure.dataset, failure.run, failure.stage, failure.message
            );
        }
        info!(
            "Wrote {} records to {:?} ({} failures)",
            summary.records.len(),
            results_path,
            summary.failures.len()
        );
        Ok(())
    }
}
