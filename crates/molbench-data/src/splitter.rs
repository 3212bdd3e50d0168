//! Deterministic train/valid/test splitting.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use molbench_core::{MolbenchError, Result};

use crate::dataset::Dataset;

/// Fractions of the three splits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    /// Training share.
    pub train: f64,
    /// Validation share.
    pub valid: f64,
    /// Test share.
    pub test: f64,
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self {
            train: 0.8,
            valid: 0.1,
            test: 0.1,
        }
    }
}

impl SplitFractions {
    fn validate(&self) -> Result<()> {
        let parts = [self.train, self.valid, self.test];
        if parts.iter().any(|&f| !(0.0..=1.0).contains(&f)) {
            return Err(MolbenchError::config("split fractions must lie in [0, 1]"));
        }
        if ((parts.iter().sum::<f64>()) - 1.0).abs() > 1e-6 {
            return Err(MolbenchError::config("split fractions must sum to 1"));
        }
        Ok(())
    }
}

/// How rows are assigned to splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Splitter {
    /// Contiguous blocks in file order.
    #[default]
    Index,
    /// Seeded shuffle, then contiguous blocks.
    Random {
        /// Shuffle seed.
        seed: u64,
    },
}

impl Splitter {
    /// Splits `dataset` into (train, valid, test).
    pub fn split(
        &self,
        dataset: &Dataset,
        fractions: SplitFractions,
    ) -> Result<(Dataset, Dataset, Dataset)> {
        fractions.validate()?;
        let n = dataset.len();
        let mut order: Vec<usize> = (0..n).collect();
        if let Self::Random { seed } = self {
            order.shuffle(&mut StdRng::seed_from_u64(*seed));
        }
        let train_end = (fractions.train * n as f64).floor() as usize;
        let valid_end = ((fractions.train + fractions.valid) * n as f64).floor() as usize;
        let valid_end = valid_end.clamp(train_end, n);

        tracing::debug!(
            splitter = ?self,
            train = train_end,
            valid = valid_end - train_end,
            test = n - valid_end,
            "Split dataset"
        );

        Ok((
            dataset.select(&order[..train_end]),
            dataset.select(&order[train_end..valid_end]),
            dataset.select(&order[valid_end..]),
        ))
    }
}
