//! Benchmark sweeps for molbench.
//!
//! - [`config`]: the JSON sweep configuration.
//! - [`driver`]: runs datasets × hyperparameter sets and records failures.
//! - [`results`]: the append-only results file.
//! - [`reload`]: save/reload parity checks.
//!
//! # Example
//!
//! ```no_run
//! use molbench_bench::{BenchmarkConfig, BenchmarkDriver};
//! use molbench_core::ModelFamily;
//!
//! let config = BenchmarkConfig::default()
//!     .with_datasets(["tox21"])
//!     .with_model(ModelFamily::RandomForest)
//!     .with_data_dir("./datasets");
//! let summary = BenchmarkDriver::new(config).run()?;
//! println!("{} runs, {} failures", summary.records.len(), summary.failures.len());
//! # Ok::<(), molbench_core::MolbenchError>(())
//! ```

pub mod config;
pub mod driver;
pub mod reload;
pub mod results;

pub use config::{default_base_dir, BenchmarkConfig, ResultsFormat};
pub use driver::{BenchmarkDriver, Stage, SweepFailure, SweepSummary};
pub use reload::{ReloadReport, ReloadVerifier, DEFAULT_TOLERANCE};
pub use results::{ResultsWriter, RunRecord};
