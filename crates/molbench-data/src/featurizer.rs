//! Molecule featurizers.
//!
//! Two featurizers are provided:
//!
//! - [`Featurizer::Ecfp`]: extended-connectivity fingerprint. Atom environments
//!   up to `radius` bonds are hashed into identifiers and folded into a
//!   bit vector of `size` bits.
//! - [`Featurizer::GraphConv`]: a [`MolGraph`] per molecule with
//!   [`GRAPH_ATOM_FEATURES`] features per atom.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2};

use molbench_core::FeaturizerKind;

use crate::dataset::{Features, MolGraph};
use crate::smiles::Molecule;

/// Default fingerprint width.
pub const ECFP_SIZE: usize = 1024;

/// Default fingerprint radius.
pub const ECFP_RADIUS: usize = 2;

/// Element vocabulary for the atom one-hot; the last slot catches everything else.
const ATOM_SYMBOLS: [&str; 44] = [
    "C", "N", "O", "S", "F", "Si", "P", "Cl", "Br", "Mg", "Na", "Ca", "Fe", "As", "Al", "I", "B",
    "V", "K", "Tl", "Yb", "Sb", "Sn", "Ag", "Pd", "Co", "Se", "Ti", "Zn", "H", "Li", "Ge", "Cu",
    "Au", "Ni", "Cd", "In", "Mn", "Zr", "Cr", "Pt", "Hg", "Pb", "Unknown",
];

const MAX_DEGREE: usize = 10;
const MAX_HYDROGENS: usize = 4;
const MAX_IMPLICIT_VALENCE: usize = 5;

/// Width of a graph-convolution atom feature row.
pub const GRAPH_ATOM_FEATURES: usize =
    ATOM_SYMBOLS.len() + (MAX_DEGREE + 1) + (MAX_HYDROGENS + 1) + (MAX_IMPLICIT_VALENCE + 1) + 5;

/// A featurizer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Featurizer {
    /// Hashed circular fingerprint.
    Ecfp {
        /// Number of bits.
        size: usize,
        /// Environment radius in bonds.
        radius: usize,
    },
    /// Per-atom features plus adjacency.
    GraphConv,
}

impl Featurizer {
    /// The default featurizer for a kind.
    pub fn from_kind(kind: FeaturizerKind) -> Self {
        match kind {
            FeaturizerKind::Ecfp => Self::Ecfp {
                size: ECFP_SIZE,
                radius: ECFP_RADIUS,
            },
            FeaturizerKind::GraphConv => Self::GraphConv,
        }
    }

    /// Kind of this featurizer.
    pub fn kind(&self) -> FeaturizerKind {
        match self {
            Self::Ecfp { .. } => FeaturizerKind::Ecfp,
            Self::GraphConv => FeaturizerKind::GraphConv,
        }
    }

    /// Featurizes a batch of parsed molecules.
    pub fn featurize(&self, molecules: &[Molecule]) -> Features {
        match *self {
            Self::Ecfp { size, radius } => {
                let mut x = Array2::zeros((molecules.len(), size));
                for (row, mol) in molecules.iter().enumerate() {
                    x.row_mut(row).assign(&ecfp(mol, size, radius));
                }
                Features::Dense(x)
            }
            Self::GraphConv => Features::Graph(molecules.iter().map(mol_graph).collect()),
        }
    }
}

/// Hashes two words into one (CityHash `Hash128to64`).
fn mix(u: u64, v: u64) -> u64 {
    const K_MUL: u64 = 0x9ddf_ea08_eb38_2d69;
    let mut a = (u ^ v).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (v ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}

fn hash_symbol(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(0x9ae1_6a3b_2f90_404f, |acc, b| mix(acc, u64::from(b)))
}

fn atom_invariant(mol: &Molecule, i: usize) -> u64 {
    let atom = &mol.atoms()[i];
    [
        mol.degree(i) as u64,
        u64::from(mol.total_h(i)),
        atom.charge as i64 as u64,
        u64::from(atom.aromatic),
        u64::from(mol.in_ring(i)),
    ]
    .into_iter()
    .fold(hash_symbol(&atom.symbol), mix)
}

/// Extended-connectivity fingerprint folded to `size` bits.
pub fn ecfp(mol: &Molecule, size: usize, radius: usize) -> Array1<f32> {
    let mut fp = Array1::zeros(size);
    if size == 0 {
        return fp;
    }
    let mut idents: Vec<u64> = (0..mol.n_atoms()).map(|i| atom_invariant(mol, i)).collect();
    let mut seen: BTreeSet<u64> = idents.iter().copied().collect();

    for round in 0..radius {
        idents = (0..mol.n_atoms())
            .map(|i| {
                let mut env: Vec<(u64, u64)> = mol
                    .neighbors(i)
                    .iter()
                    .map(|&(j, order)| (order.code(), idents[j]))
                    .collect();
                env.sort_unstable();
                env.into_iter()
                    .fold(mix(idents[i], round as u64 + 1), |acc, (code, id)| {
                        mix(mix(acc, code), id)
                    })
            })
            .collect();
        seen.extend(idents.iter().copied());
    }

    for id in seen {
        fp[(id % size as u64) as usize] = 1.0;
    }
    fp
}

fn one_hot(out: &mut Vec<f32>, value: usize, width: usize) {
    let idx = value.min(width - 1);
    out.extend((0..width).map(|k| if k == idx { 1.0 } else { 0.0 }));
}

/// Graph-convolution features for one molecule.
pub fn mol_graph(mol: &Molecule) -> MolGraph {
    let n = mol.n_atoms();
    let mut data = Vec::with_capacity(n * GRAPH_ATOM_FEATURES);
    for i in 0..n {
        let atom = &mol.atoms()[i];
        let symbol_idx = ATOM_SYMBOLS
            .iter()
            .position(|&s| s == atom.symbol)
            .unwrap_or(ATOM_SYMBOLS.len() - 1);
        one_hot(&mut data, symbol_idx, ATOM_SYMBOLS.len());
        one_hot(&mut data, mol.degree(i), MAX_DEGREE + 1);
        one_hot(&mut data, usize::from(mol.total_h(i)), MAX_HYDROGENS + 1);
        one_hot(
            &mut data,
            usize::from(mol.implicit_h(i)),
            MAX_IMPLICIT_VALENCE + 1,
        );
        data.push(f32::from(u8::from(atom.aromatic)));
        data.push(f32::from(atom.charge));
        data.push(f32::from(u8::from(mol.in_ring(i))));
        data.push(f32::from(u8::from(mol.in_ring_of_size(i, 5))));
        data.push(f32::from(u8::from(mol.in_ring_of_size(i, 6))));
    }
    let atom_features = Array2::from_shape_vec((n, GRAPH_ATOM_FEATURES), data)
        .unwrap_or_else(|_| Array2::zeros((n, GRAPH_ATOM_FEATURES)));
    let adjacency = (0..n)
        .map(|i| mol.neighbors(i).iter().map(|&(j, _)| j).collect())
        .collect();
    MolGraph {
        atom_features,
        adjacency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smiles::parse_smiles;

    #[test]
    fn test_graph_feature_width() {
        assert_eq!(GRAPH_ATOM_FEATURES, 71);
        let g = mol_graph(&parse_smiles("c1ccccc1O").unwrap());
        assert_eq!(g.atom_features.dim(), (7, 71));
        assert_eq!(g.adjacency[0].len(), 2);
        assert_eq!(g.adjacency[5].len(), 3);
        // carbon one-hot
        assert_eq!(g.atom_features[[0, 0]], 1.0);
        // oxygen one-hot
        assert_eq!(g.atom_features[[6, 2]], 1.0);
    }

    #[test]
    fn test_unknown_element_uses_last_slot() {
        let g = mol_graph(&parse_smiles("[U]").unwrap());
        assert_eq!(g.atom_features[[0, 43]], 1.0);
        assert_eq!(g.atom_features.row(0).iter().take(44).sum::<f32>(), 1.0);
    }

    #[test]
    fn test_ecfp_is_deterministic_and_discriminative() {
        let a = ecfp(&parse_smiles("CCO").unwrap(), ECFP_SIZE, ECFP_RADIUS);
        let b = ecfp(&parse_smiles("CCO").unwrap(), ECFP_SIZE, ECFP_RADIUS);
        let c = ecfp(&parse_smiles("c1ccccc1").unwrap(), ECFP_SIZE, ECFP_RADIUS);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.sum() > 0.0);
        assert!(a.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_featurize_batch() {
        let mols: Vec<_> = ["CCO", "CCN", "C"]
            .iter()
            .map(|s| parse_smiles(s).unwrap())
            .collect();
        let x = Featurizer::from_kind(FeaturizerKind::Ecfp).featurize(&mols);
        assert_eq!(x.len(), 3);
        assert_eq!(x.n_features(), ECFP_SIZE);

        let g = Featurizer::GraphConv.featurize(&mols);
        assert_eq!(g.n_features(), GRAPH_ATOM_FEATURES);
    }
}
