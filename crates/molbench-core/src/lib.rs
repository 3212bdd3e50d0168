//! Core types shared by every molbench crate.
//!
//! This crate provides:
//!
//! - **Error types**: the [`MolbenchError`] taxonomy and [`LoadError`].
//! - **Model families**: the closed [`ModelFamily`] set and [`FeaturizerKind`].
//! - **Hyperparameters**: typed, validated per-family configurations.
//! - **Training context**: explicit random state passed into every fit.
//!
//! # Example
//!
//! ```
//! use molbench_core::{HyperParams, ModelFamily};
//!
//! let family: ModelFamily = "tf".parse().unwrap();
//! let hp = HyperParams::default_for(family);
//! assert!(hp.validate().is_ok());
//! ```

pub mod context;
pub mod error;
pub mod family;
pub mod hyperparams;

pub use context::TrainingContext;
pub use error::{LoadError, MolbenchError, Result};
pub use family::{FeaturizerKind, ModelFamily};
pub use hyperparams::{
    DnnParams, ForestParams, GraphConvParams, HyperParams, LogRegParams, MaxFeatures,
    PenaltyType, RobustParams,
};
