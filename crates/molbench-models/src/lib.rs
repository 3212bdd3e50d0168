//! Model adapters and metrics for molbench.
//!
//! Every family is trained and persisted through the [`Model`] trait:
//!
//! - [`NetworkModel`] adapts the gradient-trained [`Network`]s
//!   ([`MultitaskClassifier`], [`RobustMultitaskClassifier`],
//!   [`LogisticRegressionModel`], [`GraphConvModel`]). Their architecture
//!   name is recorded on save and resolved through an
//!   [`ArchitectureRegistry`] on reload.
//! - [`RandomForestModel`] is a single-task forest, normally wrapped in
//!   [`SingletaskToMultitask`].
//!
//! [`build_model`] turns a family plus [`HyperParams`](molbench_core::HyperParams)
//! into an unfitted adapter.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use molbench_core::{HyperParams, ModelFamily, TrainingContext};
//! use molbench_data::Dataset;
//! use molbench_models::{build_model, ArchitectureRegistry, FitOptions, Metric, MetricKind};
//!
//! fn train(dataset: &Dataset) -> molbench_core::Result<()> {
//!     let registry = Arc::new(ArchitectureRegistry::with_defaults());
//!     let hp = HyperParams::default_for(ModelFamily::MultitaskDnn);
//!     let mut model = build_model(
//!         ModelFamily::MultitaskDnn,
//!         &hp,
//!         dataset.tasks().to_vec(),
//!         "/tmp/model_tf".as_ref(),
//!         registry,
//!     )?;
//!     model.fit(dataset, &FitOptions::default(), &mut TrainingContext::new(123))?;
//!     let scores = model.evaluate(dataset, &[Metric::mean(MetricKind::RocAuc)], &[])?;
//!     println!("{:?}", scores.primary("mean-roc_auc_score"));
//!     model.save()
//! }
//! ```

pub mod dnn;
pub mod forest;
pub mod graph_conv;
pub mod layers;
pub mod logreg;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod registry;
pub mod robust;
pub mod singletask;
pub mod storage;

pub use dnn::MultitaskClassifier;
pub use forest::{DecisionTree, RandomForestModel};
pub use graph_conv::GraphConvModel;
pub use logreg::LogisticRegressionModel;
pub use metrics::{
    evaluate_predictions, evaluate_tasks, Aggregation, Metric, MetricKind, MetricScores, Scores,
};
pub use model::{FitOptions, Model, Network, NetworkModel};
pub use optim::Adam;
pub use registry::{
    build_model, default_architecture, ArchitectureRegistry, ArchitectureSpec, ModelBuilder,
    NetworkFactory,
};
pub use robust::RobustMultitaskClassifier;
pub use singletask::{SingletaskToMultitask, SINGLETASK_ARCHITECTURE, SKIPPED_TASK_PREDICTION};
pub use storage::DEFAULT_MAX_TO_KEEP;
