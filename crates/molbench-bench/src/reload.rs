//! Save/reload parity check.

use serde::{Deserialize, Serialize};

use molbench_core::{MolbenchError, Result};
use molbench_data::Dataset;
use molbench_models::{Metric, Model, Scores};

/// Default largest score difference accepted between a model and its reload.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Outcome of one parity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Scores of the model that was saved.
    pub original: Scores,
    /// Scores of the reloaded model.
    pub reloaded: Scores,
    /// Largest absolute difference between matching scores.
    pub max_abs_diff: f64,
    /// Whether both models predicted exactly the same values.
    pub predictions_equal: bool,
    /// Tolerance the check was run with.
    pub tolerance: f64,
}

impl ReloadReport {
    /// True when every score matches within the tolerance.
    pub fn passed(&self) -> bool {
        self.max_abs_diff <= self.tolerance
    }
}

/// Saves a fitted model, reloads it into a fresh adapter and compares scores.
#[derive(Debug, Clone, Copy)]
pub struct ReloadVerifier {
    tolerance: f64,
}

impl Default for ReloadVerifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl ReloadVerifier {
    /// Verifier accepting score differences up to `tolerance`.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Accepted score difference.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Saves `original`, reloads `fresh` from the same directory and scores
    /// both on `dataset`.
    ///
    /// Save and reload failures are returned as errors; a score mismatch is
    /// reported in the [`ReloadReport`].
    pub fn verify(
        &self,
        original: &dyn Model,
        fresh: &mut dyn Model,
        dataset: &Dataset,
        metrics: &[Metric],
    ) -> Result<ReloadReport> {
        if original.model_dir() != fresh.model_dir() {
            return Err(MolbenchError::config(format!(
                "fresh model reads {} but the original saves to {}",
                fresh.model_dir().display(),
                original.model_dir().display()
            )));
        }
        original.save()?;
        fresh.reload()?;

        let original_scores = original.evaluate(dataset, metrics, &[])?;
        let reloaded_scores = fresh.evaluate(dataset, metrics, &[])?;
        let predictions_equal = original.predict(dataset)? == fresh.predict(dataset)?;
        let max_abs_diff = original_scores.max_abs_diff(&reloaded_scores);

        let report = ReloadReport {
            original: original_scores,
            reloaded: reloaded_scores,
            max_abs_diff,
            predictions_equal,
            tolerance: self.tolerance,
        };
        if report.passed() {
            tracing::info!(
                family = %original.family(),
                max_abs_diff,
                predictions_equal,
                "Reload parity holds"
            );
        } else {
            tracing::warn!(
                family = %original.family(),
                max_abs_diff,
                tolerance = self.tolerance,
                "Reload parity failed"
            );
        }
        Ok(report)
    }
}
