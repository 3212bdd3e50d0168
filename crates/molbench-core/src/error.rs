//! Error types for the molbench core library.
//!
//! This module defines the error taxonomy shared by every molbench crate:
//! configuration errors raised before any work starts, load errors raised when
//! a model directory cannot be turned back into a model, and computation errors
//! raised by metrics that have nothing valid to score.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reconstructing a model from its storage directory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The model directory does not exist.
    #[error("Model directory not found: {0}")]
    MissingDirectory(PathBuf),

    /// A file required for reload is absent from the model directory.
    #[error("Missing required file: {0}")]
    MissingFile(PathBuf),

    /// The saved architecture has no registered rebuild factory.
    #[error("No factory registered for architecture '{architecture}'")]
    MissingFactory {
        /// Architecture name recorded in the manifest.
        architecture: String,
    },

    /// The directory holds a model of a different family.
    #[error("Model family mismatch: expected {expected}, found {found}")]
    FamilyMismatch {
        /// Family of the adapter asked to reload.
        expected: String,
        /// Family recorded on disk.
        found: String,
    },

    /// Saved state is unreadable or inconsistent.
    #[error("Corrupted model state: {0}")]
    Corrupted(String),
}

/// The main error type for molbench operations.
#[derive(Debug, Error)]
pub enum MolbenchError {
    /// Error during configuration parsing or validation.
    #[error("Configuration error: {message}")]
    Config {
        /// A description of the configuration error.
        message: String,
    },

    /// A model could not be reloaded from disk.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// A metric could not be computed for a task.
    #[error("Computation error for {metric} on task '{task}': {reason}")]
    Computation {
        /// Metric name.
        metric: String,
        /// Task name.
        task: String,
        /// Why the score is undefined.
        reason: String,
    },

    /// Prediction, evaluation or save was requested before fit or reload.
    #[error("Model has not been fitted or reloaded")]
    NotFitted,

    /// I/O failure with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Error when serialization or deserialization fails.
    #[error("Serialization error: {message}")]
    Serialization {
        /// A description of the serialization error.
        message: String,
    },
}

impl MolbenchError {
    /// Builds a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Builds an I/O error carrying the path that failed.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a computation error for one (metric, task) cell.
    pub fn computation(
        metric: impl Into<String>,
        task: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Computation {
            metric: metric.into(),
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that should abort a sweep before any work.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true for reload failures.
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load(_))
    }
}

impl From<serde_json::Error> for MolbenchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for molbench operations.
pub type Result<T> = std::result::Result<T, MolbenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MolbenchError::config("unknown dataset 'foo'");
        assert_eq!(err.to_string(), "Configuration error: unknown dataset 'foo'");
        assert!(err.is_config());

        let err = MolbenchError::computation("roc_auc_score", "NR-AR", "no valid examples");
        assert_eq!(
            err.to_string(),
            "Computation error for roc_auc_score on task 'NR-AR': no valid examples"
        );

        let err: MolbenchError = LoadError::MissingFactory {
            architecture: "multitask_dnn".to_string(),
        }
        .into();
        assert!(err.is_load());
        assert_eq!(
            err.to_string(),
            "Load error: No factory registered for architecture 'multitask_dnn'"
        );
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = MolbenchError::io(
            "/tmp/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing"));
    }
}
