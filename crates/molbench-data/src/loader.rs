//! Dataset loading.
//!
//! Raw data is a CSV (optionally gzipped) with a `smiles` column, an optional
//! `mol_id` column and one column per task. Rows whose SMILES cannot be parsed
//! are dropped with a warning. An empty task cell is a missing label and gets
//! weight zero.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use flate2::read::GzDecoder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use molbench_core::{FeaturizerKind, MolbenchError, Result};

use crate::cache::FeatureCache;
use crate::dataset::Dataset;
use crate::featurizer::Featurizer;
use crate::smiles::parse_smiles;
use crate::splitter::{SplitFractions, Splitter};
use crate::transformer::Transformer;

/// The datasets the benchmark knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetName {
    /// Tox21 toxicity panel.
    Tox21,
    /// Maximum unbiased validation set.
    Muv,
    /// PubChem bioassays.
    Pcba,
    /// NCI growth inhibition screens.
    Nci,
    /// Side effect resource.
    Sider,
    /// ToxCast assays.
    Toxcast,
}

impl DatasetName {
    /// Every recognized dataset.
    pub const ALL: [DatasetName; 6] = [
        DatasetName::Tox21,
        DatasetName::Muv,
        DatasetName::Pcba,
        DatasetName::Nci,
        DatasetName::Sider,
        DatasetName::Toxcast,
    ];

    /// Datasets selected by `"all"`. NCI is left out of the full sweep.
    pub const SWEEP: [DatasetName; 5] = [
        DatasetName::Tox21,
        DatasetName::Muv,
        DatasetName::Pcba,
        DatasetName::Sider,
        DatasetName::Toxcast,
    ];

    /// Lowercase name, also the file stem of the raw data.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tox21 => "tox21",
            Self::Muv => "muv",
            Self::Pcba => "pcba",
            Self::Nci => "nci",
            Self::Sider => "sider",
            Self::Toxcast => "toxcast",
        }
    }

    /// Expands a selector: a dataset name or `all`.
    pub fn expand(selector: &str) -> Result<Vec<DatasetName>> {
        if selector.eq_ignore_ascii_case("all") {
            Ok(Self::SWEEP.to_vec())
        } else {
            Ok(vec![selector.parse()?])
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetName {
    type Err = MolbenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == lower)
            .ok_or_else(|| MolbenchError::config(format!("Dataset '{s}' not supported")))
    }
}

/// A dataset split three ways, with the transformers applied to every split.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    /// Which dataset this is.
    pub name: DatasetName,
    /// Task names.
    pub tasks: Vec<String>,
    /// Training split.
    pub train: Dataset,
    /// Validation split.
    pub valid: Dataset,
    /// Test split.
    pub test: Dataset,
    /// Transformers fitted on the full dataset, in application order.
    pub transformers: Vec<Transformer>,
}

/// Loads, featurizes, splits and transforms datasets.
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    data_dir: PathBuf,
    cache: Option<FeatureCache>,
    splitter: Splitter,
    fractions: SplitFractions,
}

impl DatasetLoader {
    /// Creates a loader reading raw files from `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: None,
            splitter: Splitter::default(),
            fractions: SplitFractions::default(),
        }
    }

    /// Enables the feature cache.
    pub fn with_cache(mut self, cache: FeatureCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the splitter.
    pub fn with_splitter(mut self, splitter: Splitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Sets the split fractions.
    pub fn with_fractions(mut self, fractions: SplitFractions) -> Self {
        self.fractions = fractions;
        self
    }

    /// Raw data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Finds `<name>.csv` or `<name>.csv.gz` under the data directory.
    pub fn source_path(&self, name: DatasetName) -> Result<PathBuf> {
        let plain = self.data_dir.join(format!("{name}.csv"));
        if plain.is_file() {
            return Ok(plain);
        }
        let gz = self.data_dir.join(format!("{name}.csv.gz"));
        if gz.is_file() {
            return Ok(gz);
        }
        Err(MolbenchError::io(
            plain,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no raw data file"),
        ))
    }

    /// Loads a dataset by name.
    pub fn load(&self, name: DatasetName, featurizer: FeaturizerKind) -> Result<LoadedDataset> {
        let start = Instant::now();
        let source = self.source_path(name)?;
        tracing::info!(
            dataset = %name,
            featurizer = %featurizer,
            path = %source.display(),
            "Loading dataset"
        );

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(name.as_str(), featurizer, &source));
        let full = match cached {
            Some(dataset) => dataset,
            None => {
                let dataset = load_csv(&source, Featurizer::from_kind(featurizer))?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(name.as_str(), featurizer, &source, &dataset) {
                        tracing::warn!(error = %e, "Failed to write feature cache");
                    }
                }
                dataset
            }
        };

        let transformers = vec![Transformer::balancing(&full)];
        let (train, valid, test) = self.splitter.split(&full, self.fractions)?;
        let apply = |mut ds: Dataset| -> Result<Dataset> {
            for t in &transformers {
                ds = t.transform(&ds)?;
            }
            Ok(ds)
        };
        let (train, valid, test) = (apply(train)?, apply(valid)?, apply(test)?);

        tracing::info!(
            dataset = %name,
            samples = full.len(),
            tasks = full.n_tasks(),
            train = train.len(),
            valid = valid.len(),
            test = test.len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Loaded dataset"
        );

        Ok(LoadedDataset {
            name,
            tasks: full.tasks().to_vec(),
            train,
            valid,
            test,
            transformers,
        })
    }
}

fn csv_error(path: &Path, err: csv::Error) -> MolbenchError {
    MolbenchError::Serialization {
        message: format!("{}: {err}", path.display()),
    }
}

fn open_source(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| MolbenchError::io(path, e))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Reads and featurizes one raw CSV file into a dataset.
pub fn load_csv(path: &Path, featurizer: Featurizer) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_source(path)?);
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();

    let smiles_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("smiles"))
        .ok_or_else(|| {
            MolbenchError::config(format!("{} has no 'smiles' column", path.display()))
        })?;
    let id_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("mol_id"));
    let task_cols: Vec<usize> = (0..headers.len())
        .filter(|&c| c != smiles_col && Some(c) != id_col)
        .collect();
    let tasks: Vec<String> = task_cols
        .iter()
        .map(|&c| headers[c].trim().to_string())
        .collect();

    let mut molecules = Vec::new();
    let mut ids = Vec::new();
    let mut labels: Vec<f32> = Vec::new();
    let mut weights: Vec<f32> = Vec::new();
    let mut dropped = 0usize;

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let smiles = record.get(smiles_col).unwrap_or("").trim();
        let mol = match parse_smiles(smiles) {
            Ok(mol) => mol,
            Err(e) => {
                tracing::warn!(row, smiles, error = %e, "Dropping unparseable SMILES");
                dropped += 1;
                continue;
            }
        };

        for (&col, task) in task_cols.iter().zip(&tasks) {
            let cell = record.get(col).unwrap_or("").trim();
            if cell.is_empty() {
                labels.push(0.0);
                weights.push(0.0);
            } else {
                let value: f32 = cell.parse().map_err(|_| {
                    MolbenchError::config(format!(
                        "{}: row {row}, task '{task}': label '{cell}' is not a number",
                        path.display()
                    ))
                })?;
                labels.push(value);
                weights.push(1.0);
            }
        }
        ids.push(match id_col.and_then(|c| record.get(c)) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => row.to_string(),
        });
        molecules.push(mol);
    }

    if dropped > 0 {
        tracing::warn!(path = %path.display(), dropped, "Dropped rows with invalid SMILES");
    }

    let n = molecules.len();
    let shape_err = |e: ndarray::ShapeError| MolbenchError::config(e.to_string());
    let y = Array2::from_shape_vec((n, tasks.len()), labels).map_err(shape_err)?;
    let w = Array2::from_shape_vec((n, tasks.len()), weights).map_err(shape_err)?;
    Dataset::new(featurizer.featurize(&molecules), y, w, ids, tasks)
}
