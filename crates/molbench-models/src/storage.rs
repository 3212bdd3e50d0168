//! Reading and writing model directories.
//!
//! Every adapter persists a [`ModelManifest`] plus one bincode checkpoint
//! managed by a [`CheckpointManager`].

use std::path::Path;

use molbench_checkpoint::{
    BinaryCheckpointer, CheckpointConfig, CheckpointManager, Checkpointer, ModelManifest,
    ModelState,
};
use molbench_core::{LoadError, ModelFamily, Result};

/// Checkpoints retained per model directory unless configured otherwise.
pub const DEFAULT_MAX_TO_KEEP: usize = 1;

/// Reads the manifest of `dir`, checking that it holds a `family` model.
pub fn read_manifest(dir: &Path, family: ModelFamily) -> Result<ModelManifest> {
    if !dir.is_dir() {
        return Err(LoadError::MissingDirectory(dir.to_path_buf()).into());
    }
    let manifest = ModelManifest::read(dir)?;
    if manifest.family != family {
        return Err(LoadError::FamilyMismatch {
            expected: family.key().to_string(),
            found: manifest.family.key().to_string(),
        }
        .into());
    }
    Ok(manifest)
}

/// Saves `state` into `dir` and returns the checkpoint file name.
pub fn write_state(dir: &Path, state: &ModelState, max_to_keep: usize) -> Result<String> {
    let config = CheckpointConfig::new(dir).with_max_to_keep(max_to_keep);
    let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());
    let info = manager.save(state)?;
    Ok(info
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default())
}

/// Reads the checkpoint named by `manifest`, or the latest one in `dir`.
pub fn read_state(dir: &Path, manifest: &ModelManifest) -> Result<ModelState> {
    let state = match &manifest.checkpoint {
        Some(name) => BinaryCheckpointer::new().restore(&dir.join(name))?,
        None => CheckpointManager::new(CheckpointConfig::new(dir), BinaryCheckpointer::new())
            .restore_latest()?,
    };
    if state.family != manifest.family.key() {
        return Err(LoadError::FamilyMismatch {
            expected: manifest.family.key().to_string(),
            found: state.family,
        }
        .into());
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use molbench_core::MolbenchError;
    use tempfile::tempdir;

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let err = read_manifest(&dir.path().join("nope"), ModelFamily::MultitaskDnn).unwrap_err();
        assert!(matches!(err, MolbenchError::Load(LoadError::MissingDirectory(_))));
    }

    #[test]
    fn test_empty_directory_is_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = read_manifest(dir.path(), ModelFamily::MultitaskDnn).unwrap_err();
        assert!(matches!(err, MolbenchError::Load(LoadError::MissingFile(_))));
    }

    #[test]
    fn test_family_mismatch() {
        let dir = tempdir().unwrap();
        ModelManifest::new(ModelFamily::LogisticRegression, vec!["a".into()], 3)
            .write(dir.path())
            .unwrap();
        let err = read_manifest(dir.path(), ModelFamily::GraphConv).unwrap_err();
        assert!(matches!(err, MolbenchError::Load(LoadError::FamilyMismatch { .. })));
    }

    #[test]
    fn test_state_roundtrip_and_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let mut manifest = ModelManifest::new(ModelFamily::MultitaskDnn, vec!["a".into()], 3);
        let state = ModelState::new("tf", 4);
        manifest.checkpoint = Some(write_state(dir.path(), &state, 1).unwrap());
        assert_eq!(manifest.checkpoint.as_deref(), Some("checkpoint-4.bin"));
        assert_eq!(read_state(dir.path(), &manifest).unwrap(), state);

        std::fs::remove_file(dir.path().join("checkpoint-4.bin")).unwrap();
        let err = read_state(dir.path(), &manifest).unwrap_err();
        assert!(err.is_load());
    }
}
