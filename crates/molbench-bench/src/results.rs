//! Append-only results file.
//!
//! Every run appends one record. The file is opened in append mode per record
//! and never rewritten, so a sweep that dies halfway keeps what it finished.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use molbench_core::{MolbenchError, Result};

use crate::config::ResultsFormat;

/// Scores and timing of one (dataset, hyperparameter set) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Index of the hyperparameter set in the sweep.
    pub run: usize,
    /// Dataset name.
    pub dataset: String,
    /// Model label, e.g. `tensorflow` or `random_forest`.
    pub model: String,
    /// Metric key the scores were taken from.
    pub metric: String,
    /// Score on the train split; absent if evaluation failed.
    pub train: Option<f64>,
    /// Score on the valid split; absent if evaluation failed.
    pub valid: Option<f64>,
    /// Wall-clock seconds spent fitting and evaluating.
    pub time_for_running: f64,
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "nan".to_string(),
    }
}

impl RunRecord {
    /// The legacy CSV block for this record:
    ///
    /// ```text
    ///
    ///
    /// <run>
    /// <dataset>,train,<model>,<score>
    /// <dataset>,valid,<model>,<score>
    /// <dataset>,time_for_running,<seconds>
    /// ```
    pub fn to_legacy_csv(&self) -> String {
        let ds = &self.dataset;
        format!(
            "\n\n{}\n{ds},train,{},{}\n{ds},valid,{},{}\n{ds},time_for_running,{}",
            self.run,
            self.model,
            cell(self.train),
            self.model,
            cell(self.valid),
            self.time_for_running
        )
    }
}

/// Appends [`RunRecord`]s to the results file.
#[derive(Debug, Clone)]
pub struct ResultsWriter {
    path: PathBuf,
    format: ResultsFormat,
}

impl ResultsWriter {
    /// Writer for `path` in `format`. Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>, format: ResultsFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Results file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record, creating the file and its directory if needed.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MolbenchError::io(parent, e))?;
        }
        let text = match self.format {
            ResultsFormat::LegacyCsv => record.to_legacy_csv(),
            ResultsFormat::JsonLines => format!("{}\n", serde_json::to_string(record)?),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MolbenchError::io(&self.path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| MolbenchError::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), run = record.run, "Appended results record");
        Ok(())
    }

    /// Reads back every record of a JSON-lines file.
    pub fn read_json_lines(path: &Path) -> Result<Vec<RunRecord>> {
        let raw = std::fs::read_to_string(path).map_err(|e| MolbenchError::io(path, e))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(MolbenchError::from))
            .collect()
    }
}
