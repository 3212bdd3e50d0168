//! Datasets and featurization for molbench.
//!
//! This crate turns raw chemistry CSV files into featurized, split and
//! transformed [`Dataset`]s:
//!
//! - [`smiles`] parses SMILES strings into molecular graphs.
//! - [`featurizer`] produces hashed fingerprints or per-atom graph features.
//! - [`splitter`] makes deterministic train/valid/test splits.
//! - [`transformer`] reweights or rescales datasets.
//! - [`loader`] ties it together for the named benchmark datasets.
//! - [`cache`] keeps featurized datasets on disk between runs.
//!
//! # Example
//!
//! ```
//! use molbench_data::{parse_smiles, Featurizer};
//! use molbench_core::FeaturizerKind;
//!
//! let mol = parse_smiles("c1ccccc1O").unwrap();
//! let x = Featurizer::from_kind(FeaturizerKind::Ecfp).featurize(&[mol]);
//! assert_eq!(x.n_features(), 1024);
//! ```

pub mod cache;
pub mod dataset;
pub mod featurizer;
pub mod loader;
pub mod smiles;
pub mod splitter;
pub mod transformer;

pub use cache::FeatureCache;
pub use dataset::{Dataset, Features, MolGraph};
pub use featurizer::{Featurizer, ECFP_RADIUS, ECFP_SIZE, GRAPH_ATOM_FEATURES};
pub use loader::{load_csv, DatasetLoader, DatasetName, LoadedDataset};
pub use smiles::{parse_smiles, Molecule, SmilesError};
pub use splitter::{SplitFractions, Splitter};
pub use transformer::Transformer;
