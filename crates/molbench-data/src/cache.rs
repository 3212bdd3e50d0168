//! On-disk cache of featurized datasets.
//!
//! Featurizing a large dataset is the slowest part of a benchmark run, so the
//! full featurized dataset is stored with bincode and reused while the source
//! file is unchanged.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use molbench_core::{FeaturizerKind, MolbenchError, Result};

use crate::dataset::Dataset;

const CACHE_VERSION: u32 = 1;

/// Identifies one featurized source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct CacheKey {
    version: u32,
    dataset: String,
    featurizer: String,
    source_len: u64,
    source_modified: u64,
}

impl CacheKey {
    fn for_source(dataset: &str, featurizer: FeaturizerKind, source: &Path) -> Option<Self> {
        let meta = fs::metadata(source).ok()?;
        let source_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Some(Self {
            version: CACHE_VERSION,
            dataset: dataset.to_string(),
            featurizer: featurizer.as_str().to_string(),
            source_len: meta.len(),
            source_modified,
        })
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Serialize, Deserialize)]
struct CachedDataset {
    key: CacheKey,
    dataset: Dataset,
}

/// Directory of cached featurized datasets.
#[derive(Debug, Clone)]
pub struct FeatureCache {
    dir: PathBuf,
}

impl FeatureCache {
    /// Creates a cache rooted at `dir`. The directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{:016x}.bin",
            key.dataset,
            key.featurizer,
            key.fingerprint()
        ))
    }

    /// Returns the cached dataset for `source`, or `None` if absent, stale or unreadable.
    pub fn load(&self, dataset: &str, featurizer: FeaturizerKind, source: &Path) -> Option<Dataset> {
        let key = CacheKey::for_source(dataset, featurizer, source)?;
        let path = self.path_for(&key);
        if !path.exists() {
            return None;
        }

        let cached: Option<CachedDataset> = File::open(&path)
            .ok()
            .and_then(|file| bincode::deserialize_from(BufReader::new(file)).ok());

        match cached {
            Some(cached) if cached.key == key => {
                tracing::info!(
                    dataset,
                    featurizer = %featurizer,
                    path = %path.display(),
                    "Loaded featurized dataset from cache"
                );
                Some(cached.dataset)
            }
            _ => {
                tracing::warn!(path = %path.display(), "Discarding stale feature cache");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Stores a featurized dataset for `source`.
    pub fn store(
        &self,
        name: &str,
        featurizer: FeaturizerKind,
        source: &Path,
        dataset: &Dataset,
    ) -> Result<PathBuf> {
        let key = CacheKey::for_source(name, featurizer, source).ok_or_else(|| {
            MolbenchError::io(
                source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file vanished"),
            )
        })?;
        fs::create_dir_all(&self.dir).map_err(|e| MolbenchError::io(&self.dir, e))?;
        let path = self.path_for(&key);
        let file = File::create(&path).map_err(|e| MolbenchError::io(&path, e))?;
        let cached = CachedDataset {
            key,
            dataset: dataset.clone(),
        };
        bincode::serialize_into(BufWriter::new(file), &cached).map_err(|e| {
            MolbenchError::Serialization {
                message: e.to_string(),
            }
        })?;
        tracing::debug!(path = %path.display(), "Stored featurized dataset");
        Ok(path)
    }

    /// Removes every cache file. Returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)
            .map_err(|e| MolbenchError::io(&self.dir, e))?
            .flatten()
        {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "bin") && fs::remove_file(&path).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset() -> Dataset {
        Dataset::from_dense(array![[1.0, 0.0]], array![[1.0]], vec!["t".into()]).unwrap()
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tox21.csv");
        fs::write(&source, "smiles,t\nC,1\n").unwrap();
        let cache = FeatureCache::new(dir.path().join("cache"));

        assert!(cache.load("tox21", FeaturizerKind::Ecfp, &source).is_none());
        let path = cache
            .store("tox21", FeaturizerKind::Ecfp, &source, &dataset())
            .unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tox21-ECFP-"));
        assert_eq!(
            cache.load("tox21", FeaturizerKind::Ecfp, &source),
            Some(dataset())
        );
        assert!(cache
            .load("tox21", FeaturizerKind::GraphConv, &source)
            .is_none());
    }

    #[test]
    fn test_changed_source_misses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("muv.csv");
        fs::write(&source, "smiles,t\nC,1\n").unwrap();
        let cache = FeatureCache::new(dir.path().join("cache"));
        cache
            .store("muv", FeaturizerKind::Ecfp, &source, &dataset())
            .unwrap();

        fs::write(&source, "smiles,t\nC,1\nCC,0\n").unwrap();
        assert!(cache.load("muv", FeaturizerKind::Ecfp, &source).is_none());
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sider.csv");
        fs::write(&source, "smiles,t\nC,1\n").unwrap();
        let cache = FeatureCache::new(dir.path().join("cache"));
        let path = cache
            .store("sider", FeaturizerKind::Ecfp, &source, &dataset())
            .unwrap();
        fs::write(&path, b"garbage").unwrap();
        assert!(cache.load("sider", FeaturizerKind::Ecfp, &source).is_none());
        assert!(!path.exists());
        assert_eq!(cache.clear().unwrap(), 0);
    }
}
