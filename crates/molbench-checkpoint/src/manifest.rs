//! The `manifest.json` file describing a saved model directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use molbench_core::{HyperParams, ModelFamily};

use crate::{CheckpointError, Result};

/// File name of the manifest inside a model directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Describes what a model directory holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Manifest format version.
    pub version: u32,
    /// Model family.
    pub family: ModelFamily,
    /// Architecture name for network families; looked up in the registry on reload.
    pub architecture: Option<String>,
    /// Task names, in output column order.
    pub tasks: Vec<String>,
    /// Input feature width.
    pub n_features: usize,
    /// Completed training epochs.
    pub epochs: u64,
    /// Checkpoint file holding the state, relative to the directory.
    pub checkpoint: Option<String>,
    /// Tasks a composite model skipped because they had no weighted rows.
    #[serde(default)]
    pub skipped_tasks: Vec<String>,
    /// Hyperparameters the model was built with.
    pub hyperparams: Option<HyperParams>,
}

impl ModelManifest {
    /// Creates a manifest for `family` over `tasks`.
    pub fn new(family: ModelFamily, tasks: Vec<String>, n_features: usize) -> Self {
        Self {
            version: MANIFEST_VERSION,
            family,
            architecture: None,
            tasks,
            n_features,
            epochs: 0,
            checkpoint: None,
            skipped_tasks: Vec::new(),
            hyperparams: None,
        }
    }

    /// Sets the architecture name.
    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = Some(architecture.into());
        self
    }

    /// Sets the hyperparameters.
    pub fn with_hyperparams(mut self, hyperparams: HyperParams) -> Self {
        self.hyperparams = Some(hyperparams);
        self
    }

    /// Path of the manifest inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Writes the manifest into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = Self::path_in(dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| CheckpointError::Io { path, source: e })
    }

    /// Reads the manifest from `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = Self::path_in(dir);
        if !path.is_file() {
            return Err(CheckpointError::NotFound(path));
        }
        let json = std::fs::read_to_string(&path).map_err(|e| CheckpointError::Io {
            path: path.clone(),
            source: e,
        })?;
        let manifest: Self = serde_json::from_str(&json)
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: MANIFEST_VERSION,
                found: manifest.version,
            });
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read() {
        let dir = tempdir().unwrap();
        let manifest = ModelManifest::new(ModelFamily::MultitaskDnn, vec!["a".into()], 1024)
            .with_architecture("multitask_dnn")
            .with_hyperparams(HyperParams::default_for(ModelFamily::MultitaskDnn));
        manifest.write(dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(text.contains("\"family\": \"tf\""));
        assert_eq!(ModelManifest::read(dir.path()).unwrap(), manifest);
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ModelManifest::read(dir.path()),
            Err(CheckpointError::NotFound(_))
        ));
    }
}
