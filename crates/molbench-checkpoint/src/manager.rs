//! Checkpoint manager for one model directory.
//!
//! `CheckpointManager` handles:
//! - naming checkpoints by training step
//! - deleting the oldest checkpoints beyond `max_to_keep`
//! - finding the latest checkpoint for restore

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::checkpointer::Checkpointer;
use crate::state::ModelState;
use crate::{CheckpointError, Result};

/// Information about a saved checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Path to the checkpoint file.
    pub path: PathBuf,

    /// Step at which this checkpoint was saved.
    pub global_step: u64,
}

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Directory where checkpoints are stored.
    pub checkpoint_dir: PathBuf,

    /// Maximum number of checkpoints to keep.
    /// Older checkpoints are automatically deleted.
    pub max_to_keep: usize,
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration keeping a single checkpoint.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            max_to_keep: 1,
        }
    }

    /// Set the maximum number of checkpoints to keep.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }
}

/// Manages checkpoint lifecycle including saving, restoring, and cleanup.
///
/// Checkpoints already present in the directory are picked up on
/// construction, so retention works across manager instances.
///
/// # Examples
///
/// ```no_run
/// use molbench_checkpoint::{BinaryCheckpointer, CheckpointConfig, CheckpointManager, ModelState};
///
/// fn main() -> molbench_checkpoint::Result<()> {
///     let config = CheckpointConfig::new("/tmp/model_tf").with_max_to_keep(3);
///     let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());
///     manager.save(&ModelState::new("tf", 10))?;
///     let restored = manager.restore_latest()?;
///     assert_eq!(restored.global_step, 10);
///     Ok(())
/// }
/// ```
pub struct CheckpointManager<C: Checkpointer> {
    config: CheckpointConfig,
    checkpointer: C,
    /// Saved checkpoints, oldest first.
    history: VecDeque<CheckpointInfo>,
}

impl<C: Checkpointer> CheckpointManager<C> {
    /// Create a manager, scanning the directory for existing checkpoints.
    pub fn new(config: CheckpointConfig, checkpointer: C) -> Self {
        let history = checkpointer
            .list(&config.checkpoint_dir)
            .into_iter()
            .map(|(global_step, path)| CheckpointInfo { path, global_step })
            .collect();
        Self {
            config,
            checkpointer,
            history,
        }
    }

    /// Get the checkpoint directory.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Get the number of tracked checkpoints.
    pub fn checkpoint_count(&self) -> usize {
        self.history.len()
    }

    /// Save a checkpoint and delete any beyond `max_to_keep`.
    pub fn save(&mut self, state: &ModelState) -> Result<CheckpointInfo> {
        let path = self
            .config
            .checkpoint_dir
            .join(self.checkpointer.checkpoint_filename(state.global_step));

        tracing::info!(
            step = state.global_step,
            path = %path.display(),
            "Saving checkpoint via manager"
        );
        self.checkpointer.save(&path, state)?;

        let info = CheckpointInfo {
            path,
            global_step: state.global_step,
        };
        // Saving the same step twice overwrites in place.
        self.history.retain(|c| c.path != info.path);
        self.history.push_back(info.clone());
        self.cleanup_old()?;
        Ok(info)
    }

    /// Restore the latest checkpoint.
    pub fn restore_latest(&self) -> Result<ModelState> {
        let latest_path = self
            .checkpointer
            .latest(&self.config.checkpoint_dir)
            .ok_or_else(|| CheckpointError::NotFound(self.config.checkpoint_dir.clone()))?;
        tracing::info!(path = %latest_path.display(), "Restoring latest checkpoint");
        self.checkpointer.restore(&latest_path)
    }

    /// Remove the oldest checkpoints until at most `max_to_keep` remain.
    pub fn cleanup_old(&mut self) -> Result<()> {
        while self.history.len() > self.config.max_to_keep {
            if let Some(old) = self.history.pop_front() {
                tracing::info!(
                    path = %old.path.display(),
                    step = old.global_step,
                    "Removing old checkpoint"
                );
                if old.path.exists() {
                    std::fs::remove_file(&old.path).map_err(|e| CheckpointError::Io {
                        path: old.path.clone(),
                        source: e,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Checkpoints on disk, sorted by step.
    pub fn list_checkpoints(&self) -> Vec<PathBuf> {
        self.checkpointer
            .list(&self.config.checkpoint_dir)
            .into_iter()
            .map(|(_, path)| path)
            .collect()
    }
}
