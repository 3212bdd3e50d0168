//! Checkpoint serialization for molbench models.
//!
//! This crate provides:
//!
//! - [`ModelState`]: format-neutral snapshot of a fitted model.
//! - [`Checkpointer`]: save/restore trait with a bincode implementation.
//! - [`CheckpointManager`]: step-named checkpoints with `max_to_keep` retention.
//! - [`ModelManifest`]: the `manifest.json` describing a model directory.
//!
//! A model directory looks like:
//!
//! ```text
//! model_tf/
//!   manifest.json
//!   checkpoint-10.bin
//! ```
//!
//! # Example
//!
//! ```no_run
//! use molbench_checkpoint::{BinaryCheckpointer, CheckpointConfig, CheckpointManager, ModelState};
//!
//! fn main() -> molbench_checkpoint::Result<()> {
//!     let mut manager = CheckpointManager::new(
//!         CheckpointConfig::new("/tmp/model_tf"),
//!         BinaryCheckpointer::new(),
//!     );
//!     manager.save(&ModelState::new("tf", 10))?;
//!     let restored = manager.restore_latest()?;
//!     Ok(())
//! }
//! ```

pub mod checkpointer;
pub mod manager;
pub mod manifest;
pub mod state;

pub use checkpointer::{BinaryCheckpointer, Checkpointer};
pub use manager::{CheckpointConfig, CheckpointInfo, CheckpointManager};
pub use manifest::{ModelManifest, MANIFEST_FILE};
pub use state::{ModelState, OptimizerState, TensorState};

use std::path::PathBuf;

use molbench_core::{LoadError, MolbenchError};
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O error during checkpoint operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint file not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// Error during serialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Checkpoint version mismatch.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version.
        expected: u32,
        /// Found version.
        found: u32,
    },

    /// Checkpoint content does not match what the model expects.
    #[error("Corrupted checkpoint: {0}")]
    Corrupted(String),
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

impl From<CheckpointError> for MolbenchError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Io { path, source } => MolbenchError::Io { path, source },
            CheckpointError::NotFound(path) => LoadError::MissingFile(path).into(),
            CheckpointError::Serialization(message) => MolbenchError::Serialization { message },
            other @ (CheckpointError::Deserialization(_)
            | CheckpointError::VersionMismatch { .. }
            | CheckpointError::Corrupted(_)) => LoadError::Corrupted(other.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_end_to_end_checkpoint_workflow() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_max_to_keep(3);
        let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());

        let mut state = ModelState::new("tf", 10);
        state.add_matrix("layer0.w", &ndarray::Array2::from_elem((4, 3), 0.5));
        let mut opt = OptimizerState::new("adam", 0.001, 40);
        opt.first_moments.insert("layer0.w".into(), vec![0.0; 12]);
        state.optimizer = Some(opt);

        let info = manager.save(&state).unwrap();
        assert_eq!(info.global_step, 10);

        let restored = manager.restore_latest().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_conversion_into_load_errors() {
        let err: MolbenchError = CheckpointError::NotFound(PathBuf::from("/m/checkpoint-1.bin")).into();
        assert!(matches!(err, MolbenchError::Load(LoadError::MissingFile(_))));

        let err: MolbenchError = CheckpointError::Corrupted("missing tensor 'w'".into()).into();
        assert!(err.is_load());
        assert!(err.to_string().contains("missing tensor"));
    }
}
