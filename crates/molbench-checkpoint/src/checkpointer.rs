//! Checkpointer trait for save/restore operations.
//!
//! Tensors are stored with bincode so floats survive bit-exactly. Checkpoint
//! files are named `checkpoint-<step>.<extension>`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::state::ModelState;
use crate::{CheckpointError, Result};

/// Trait for checkpoint serialization and deserialization.
///
/// # Examples
///
/// ```no_run
/// use molbench_checkpoint::{BinaryCheckpointer, Checkpointer, ModelState};
/// use std::path::Path;
///
/// fn main() -> molbench_checkpoint::Result<()> {
///     let checkpointer = BinaryCheckpointer::new();
///     let state = ModelState::new("tf", 10);
///     checkpointer.save(Path::new("/tmp/model/checkpoint-10.bin"), &state)?;
///     let restored = checkpointer.restore(Path::new("/tmp/model/checkpoint-10.bin"))?;
///     assert_eq!(restored.global_step, 10);
///     Ok(())
/// }
/// ```
pub trait Checkpointer: Send + Sync {
    /// File extension of this format, without the dot.
    fn extension(&self) -> &'static str;

    /// Save model state to the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    fn save(&self, path: &Path, state: &ModelState) -> Result<()>;

    /// Restore model state from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint doesn't exist, is corrupted,
    /// or deserialization fails.
    fn restore(&self, path: &Path) -> Result<ModelState>;

    /// File name for a checkpoint at `step`.
    fn checkpoint_filename(&self, step: u64) -> String {
        format!("checkpoint-{}.{}", step, self.extension())
    }

    /// Every checkpoint in `dir`, sorted by step (ascending).
    fn list(&self, dir: &Path) -> Vec<(u64, PathBuf)> {
        let mut found: Vec<(u64, PathBuf)> = std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let step = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .and_then(|f| parse_step(f, self.extension()))?;
                Some((step, path))
            })
            .collect();
        found.sort_by_key(|(step, _)| *step);
        found
    }

    /// Find the checkpoint with the highest step in a directory.
    fn latest(&self, dir: &Path) -> Option<PathBuf> {
        self.list(dir).pop().map(|(_, path)| path)
    }
}

/// Parses the step from `checkpoint-<step>.<extension>`.
pub fn parse_step(filename: &str, extension: &str) -> Option<u64> {
    filename
        .strip_prefix("checkpoint-")?
        .strip_suffix(extension)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }
    File::open(path).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn create(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    File::create(path).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn check_version(state: &ModelState) -> Result<()> {
    if state.version != crate::state::STATE_VERSION {
        return Err(CheckpointError::VersionMismatch {
            expected: crate::state::STATE_VERSION,
            found: state.version,
        });
    }
    Ok(())
}

/// Binary checkpoint implementation using bincode.
///
/// Stores floats bit-exactly, so reloaded models predict identically.
#[derive(Debug, Clone, Default)]
pub struct BinaryCheckpointer;

impl BinaryCheckpointer {
    /// Create a new binary checkpointer.
    pub fn new() -> Self {
        Self
    }
}

impl Checkpointer for BinaryCheckpointer {
    fn extension(&self) -> &'static str {
        "bin"
    }

    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "Saving binary checkpoint");
        let writer = BufWriter::new(create(path)?);
        bincode::serialize_into(writer, state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        tracing::info!(path = %path.display(), "Restoring binary checkpoint");
        let reader = BufReader::new(open(path)?);
        let state: ModelState = bincode::deserialize_from(reader)
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;
        check_version(&state)?;
        Ok(state)
    }
}
