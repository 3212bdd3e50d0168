//! A small SMILES parser.
//!
//! Handles the organic subset, bracket atoms (isotope, chirality, hydrogen
//! count, charge and atom class are accepted; isotope, chirality and class are
//! ignored), explicit bonds, branches, ring closures (`1`..`9` and `%nn`),
//! aromatic atoms and disconnected fragments. Stereo bonds `/` and `\` are
//! read as single bonds.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

/// Reasons a SMILES string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmilesError {
    /// Nothing to parse.
    #[error("empty SMILES string")]
    Empty,

    /// A character that cannot start any token.
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar {
        /// Offending character.
        ch: char,
        /// Character offset.
        pos: usize,
    },

    /// A `[` without its closing `]`.
    #[error("unterminated bracket atom starting at position {0}")]
    UnterminatedBracket(usize),

    /// A `(` or `)` that does not pair up.
    #[error("unbalanced branch at position {0}")]
    UnbalancedBranch(usize),

    /// A ring-closure digit that is opened but never closed.
    #[error("ring closure {0} is never closed")]
    UnclosedRing(u32),

    /// A bond symbol with no atom after it.
    #[error("bond at position {0} is not followed by an atom")]
    DanglingBond(usize),
}

/// Bond multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondOrder {
    /// `-` or implicit between aliphatic atoms.
    Single,
    /// `=`
    Double,
    /// `#`
    Triple,
    /// `:` or implicit between two aromatic atoms.
    Aromatic,
}

impl BondOrder {
    /// Contribution to an atom's valence. Aromatic bonds count one; the
    /// remaining aromatic electron is accounted per atom.
    pub fn valence(&self) -> u8 {
        match self {
            Self::Single | Self::Aromatic => 1,
            Self::Double => 2,
            Self::Triple => 3,
        }
    }

    /// Small integer code used when hashing environments.
    pub fn code(&self) -> u64 {
        match self {
            Self::Single => 1,
            Self::Double => 2,
            Self::Triple => 3,
            Self::Aromatic => 4,
        }
    }
}

/// One parsed atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Element symbol with normal capitalization, e.g. `C`, `Cl`, `Se`; `*` for a wildcard.
    pub symbol: String,
    /// Written in lowercase (aromatic).
    pub aromatic: bool,
    /// Formal charge.
    pub charge: i8,
    /// Hydrogen count of a bracket atom. `None` for organic-subset atoms,
    /// whose hydrogens are implicit.
    pub explicit_h: Option<u8>,
}

/// A bond between two atom indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    /// First atom.
    pub a: usize,
    /// Second atom.
    pub b: usize,
    /// Multiplicity.
    pub order: BondOrder,
}

/// A parsed molecule with precomputed neighbor lists and ring sizes.
#[derive(Debug, Clone)]
pub struct Molecule {
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    neighbors: Vec<Vec<(usize, BondOrder)>>,
    /// Smallest ring through each bond, if the bond is in a ring.
    bond_rings: Vec<Option<usize>>,
}

impl Molecule {
    fn new(atoms: Vec<Atom>, bonds: Vec<Bond>) -> Self {
        let mut neighbors = vec![Vec::new(); atoms.len()];
        for bond in &bonds {
            neighbors[bond.a].push((bond.b, bond.order));
            neighbors[bond.b].push((bond.a, bond.order));
        }
        let bond_rings = bonds
            .iter()
            .map(|bond| shortest_path_without(&neighbors, bond.a, bond.b).map(|d| d + 1))
            .collect();
        Self {
            atoms,
            bonds,
            neighbors,
            bond_rings,
        }
    }

    /// Number of heavy atoms.
    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Atoms in input order.
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Bonds in input order.
    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    /// Neighbors of atom `i` with the connecting bond order.
    pub fn neighbors(&self, i: usize) -> &[(usize, BondOrder)] {
        &self.neighbors[i]
    }

    /// Number of heavy-atom neighbors.
    pub fn degree(&self, i: usize) -> usize {
        self.neighbors[i].len()
    }

    /// Hydrogens implied by the default valence of an organic-subset atom.
    pub fn implicit_h(&self, i: usize) -> u8 {
        let atom = &self.atoms[i];
        if atom.explicit_h.is_some() {
            return 0;
        }
        let used: u8 = self.neighbors[i]
            .iter()
            .map(|(_, order)| order.valence())
            .sum::<u8>()
            + u8::from(atom.aromatic);
        default_valences(&atom.symbol)
            .iter()
            .find(|&&v| v >= used)
            .map(|&v| v - used)
            .unwrap_or(0)
    }

    /// Explicit plus implicit hydrogens.
    pub fn total_h(&self, i: usize) -> u8 {
        self.atoms[i].explicit_h.unwrap_or(0) + self.implicit_h(i)
    }

    /// Returns true if atom `i` lies on any ring.
    pub fn in_ring(&self, i: usize) -> bool {
        self.ring_sizes(i).next().is_some()
    }

    /// Returns true if atom `i` lies on a smallest ring of `size` atoms.
    pub fn in_ring_of_size(&self, i: usize, size: usize) -> bool {
        self.ring_sizes(i).any(|s| s == size)
    }

    fn ring_sizes(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.bonds
            .iter()
            .zip(&self.bond_rings)
            .filter(move |(bond, _)| bond.a == i || bond.b == i)
            .filter_map(|(_, ring)| *ring)
    }
}

fn default_valences(symbol: &str) -> &'static [u8] {
    match symbol {
        "B" => &[3],
        "C" => &[4],
        "N" => &[3, 5],
        "O" => &[2],
        "P" => &[3, 5],
        "S" => &[2, 4, 6],
        "F" | "Cl" | "Br" | "I" => &[1],
        _ => &[],
    }
}

/// Breadth-first distance from `from` to `to` that does not use the direct edge between them.
fn shortest_path_without(
    neighbors: &[Vec<(usize, BondOrder)>],
    from: usize,
    to: usize,
) -> Option<usize> {
    let mut dist = vec![usize::MAX; neighbors.len()];
    let mut queue = VecDeque::new();
    dist[from] = 0;
    queue.push_back(from);
    while let Some(cur) = queue.pop_front() {
        for &(next, _) in &neighbors[cur] {
            if cur == from && next == to {
                continue;
            }
            if dist[next] == usize::MAX {
                dist[next] = dist[cur] + 1;
                if next == to {
                    return Some(dist[next]);
                }
                queue.push_back(next);
            }
        }
    }
    None
}

/// Parses a SMILES string into a [`Molecule`].
pub fn parse_smiles(smiles: &str) -> Result<Molecule, SmilesError> {
    Parser::new(smiles).parse()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    prev: Option<usize>,
    branches: Vec<Option<usize>>,
    pending: Option<(BondOrder, usize)>,
    rings: HashMap<u32, (usize, Option<BondOrder>)>,
}

impl Parser {
    fn new(smiles: &str) -> Self {
        Self {
            chars: smiles.trim().chars().collect(),
            pos: 0,
            atoms: Vec::new(),
            bonds: Vec::new(),
            prev: None,
            branches: Vec::new(),
            pending: None,
            rings: HashMap::new(),
        }
    }

    fn parse(mut self) -> Result<Molecule, SmilesError> {
        if self.chars.is_empty() {
            return Err(SmilesError::Empty);
        }
        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '(' => {
                    if self.prev.is_none() {
                        return Err(SmilesError::UnbalancedBranch(self.pos));
                    }
                    self.branches.push(self.prev);
                    self.pos += 1;
                }
                ')' => {
                    if let Some((_, at)) = self.pending {
                        return Err(SmilesError::DanglingBond(at));
                    }
                    self.prev = self
                        .branches
                        .pop()
                        .ok_or(SmilesError::UnbalancedBranch(self.pos))?;
                    self.pos += 1;
                }
                '-' | '/' | '\\' => self.bond_symbol(BondOrder::Single),
                '=' => self.bond_symbol(BondOrder::Double),
                '#' => self.bond_symbol(BondOrder::Triple),
                ':' => self.bond_symbol(BondOrder::Aromatic),
                '.' => {
                    if let Some((_, at)) = self.pending {
                        return Err(SmilesError::DanglingBond(at));
                    }
                    self.prev = None;
                    self.pos += 1;
                }
                '0'..='9' | '%' => self.ring_closure()?,
                '[' => {
                    let atom = self.bracket_atom()?;
                    self.add_atom(atom);
                }
                _ => {
                    let atom = self.organic_atom()?;
                    self.add_atom(atom);
                }
            }
        }

        if let Some((_, at)) = self.pending {
            return Err(SmilesError::DanglingBond(at));
        }
        if !self.branches.is_empty() {
            return Err(SmilesError::UnbalancedBranch(self.chars.len()));
        }
        if let Some(&ring) = self.rings.keys().min() {
            return Err(SmilesError::UnclosedRing(ring));
        }
        if self.atoms.is_empty() {
            return Err(SmilesError::Empty);
        }
        Ok(Molecule::new(self.atoms, self.bonds))
    }

    fn bond_symbol(&mut self, order: BondOrder) {
        self.pending = Some((order, self.pos));
        self.pos += 1;
    }

    fn implicit_order(&self, a: usize, b: usize) -> BondOrder {
        if self.atoms[a].aromatic && self.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn add_atom(&mut self, atom: Atom) {
        let idx = self.atoms.len();
        self.atoms.push(atom);
        if let Some(prev) = self.prev {
            let order = match self.pending.take() {
                Some((order, _)) => order,
                None => self.implicit_order(prev, idx),
            };
            self.bonds.push(Bond {
                a: prev,
                b: idx,
                order,
            });
        }
        self.pending = None;
        self.prev = Some(idx);
    }

    fn ring_closure(&mut self) -> Result<(), SmilesError> {
        let start = self.pos;
        let number = if self.chars[self.pos] == '%' {
            let digits: String = self
                .chars
                .iter()
                .skip(self.pos + 1)
                .take(2)
                .filter(|c| c.is_ascii_digit())
                .collect();
            if digits.len() != 2 {
                return Err(SmilesError::UnexpectedChar { ch: '%', pos: start });
            }
            self.pos += 3;
            digits
                .parse::<u32>()
                .map_err(|_| SmilesError::UnexpectedChar { ch: '%', pos: start })?
        } else {
            let d = self.chars[self.pos].to_digit(10).unwrap_or(0);
            self.pos += 1;
            d
        };

        let current = self.prev.ok_or(SmilesError::UnexpectedChar {
            ch: self.chars[start],
            pos: start,
        })?;
        let bond = self.pending.take().map(|(order, _)| order);

        match self.rings.remove(&number) {
            Some((other, opened_with)) => {
                if other == current {
                    return Err(SmilesError::UnexpectedChar {
                        ch: self.chars[start],
                        pos: start,
                    });
                }
                let order = bond
                    .or(opened_with)
                    .unwrap_or_else(|| self.implicit_order(other, current));
                self.bonds.push(Bond {
                    a: other,
                    b: current,
                    order,
                });
            }
            None => {
                self.rings.insert(number, (current, bond));
            }
        }
        Ok(())
    }

    fn organic_atom(&mut self) -> Result<Atom, SmilesError> {
        let c = self.chars[self.pos];
        let next = self.chars.get(self.pos + 1).copied();
        let (symbol, aromatic, width) = match (c, next) {
            ('C', Some('l')) => ("Cl".to_string(), false, 2),
            ('B', Some('r')) => ("Br".to_string(), false, 2),
            ('B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' | '*', _) => (c.to_string(), false, 1),
            ('b' | 'c' | 'n' | 'o' | 'p' | 's', _) => (c.to_ascii_uppercase().to_string(), true, 1),
            _ => return Err(SmilesError::UnexpectedChar { ch: c, pos: self.pos }),
        };
        self.pos += width;
        Ok(Atom {
            symbol,
            aromatic,
            charge: 0,
            explicit_h: None,
        })
    }

    fn bracket_atom(&mut self) -> Result<Atom, SmilesError> {
        let open = self.pos;
        let close = self.chars[open..]
            .iter()
            .position(|&c| c == ']')
            .map(|off| open + off)
            .ok_or(SmilesError::UnterminatedBracket(open))?;
        let body: Vec<char> = self.chars[open + 1..close].to_vec();
        self.pos = close + 1;

        let unexpected = |i: usize| SmilesError::UnexpectedChar {
            ch: body.get(i).copied().unwrap_or(']'),
            pos: open + 1 + i,
        };

        let mut i = 0;
        while body.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }

        let (symbol, aromatic) = match body.get(i) {
            Some('*') => {
                i += 1;
                ("*".to_string(), false)
            }
            Some(&c) if c.is_ascii_uppercase() => {
                let mut s = c.to_string();
                i += 1;
                if let Some(&l) = body.get(i).filter(|l| l.is_ascii_lowercase()) {
                    s.push(l);
                    i += 1;
                }
                (s, false)
            }
            Some(&c) if c.is_ascii_lowercase() => {
                let two: String = body.iter().skip(i).take(2).collect();
                if two == "se" || two == "as" {
                    i += 2;
                    (capitalize(&two), true)
                } else if matches!(c, 'b' | 'c' | 'n' | 'o' | 'p' | 's') {
                    i += 1;
                    (c.to_ascii_uppercase().to_string(), true)
                } else {
                    return Err(unexpected(i));
                }
            }
            _ => return Err(unexpected(i)),
        };

        while body.get(i) == Some(&'@') {
            i += 1;
        }

        let mut hydrogens = 0u8;
        if body.get(i) == Some(&'H') {
            i += 1;
            hydrogens = 1;
            if let Some(d) = body.get(i).and_then(|c| c.to_digit(10)) {
                hydrogens = d as u8;
                i += 1;
            }
        }

        let mut charge: i8 = 0;
        if let Some(&sign @ ('+' | '-')) = body.get(i) {
            let unit: i8 = if sign == '+' { 1 } else { -1 };
            i += 1;
            charge = unit;
            if let Some(d) = body.get(i).and_then(|c| c.to_digit(10)) {
                charge = unit * d as i8;
                i += 1;
            } else {
                while body.get(i) == Some(&sign) {
                    charge += unit;
                    i += 1;
                }
            }
        }

        if body.get(i) == Some(&':') {
            i += 1;
            while body.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
        }

        if i != body.len() {
            return Err(unexpected(i));
        }

        Ok(Atom {
            symbol,
            aromatic,
            charge,
            explicit_h: Some(hydrogens),
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ethanol() {
        let mol = parse_smiles("CCO").unwrap();
        assert_eq!(mol.n_atoms(), 3);
        assert_eq!(mol.bonds().len(), 2);
        assert_eq!(mol.total_h(0), 3);
        assert_eq!(mol.total_h(1), 2);
        assert_eq!(mol.total_h(2), 1);
        assert!(!mol.in_ring(0));
    }

    #[test]
    fn test_benzene_ring() {
        let mol = parse_smiles("c1ccccc1").unwrap();
        assert_eq!(mol.n_atoms(), 6);
        assert_eq!(mol.bonds().len(), 6);
        assert!(mol.bonds().iter().all(|b| b.order == BondOrder::Aromatic));
        for i in 0..6 {
            assert_eq!(mol.total_h(i), 1);
            assert!(mol.in_ring_of_size(i, 6));
            assert!(!mol.in_ring_of_size(i, 5));
        }
    }

    #[test]
    fn test_branches_and_double_bonds() {
        // acetic acid
        let mol = parse_smiles("CC(=O)O").unwrap();
        assert_eq!(mol.n_atoms(), 4);
        assert_eq!(mol.degree(1), 3);
        assert_eq!(mol.total_h(2), 0);
        assert_eq!(mol.total_h(3), 1);
        assert!(mol.bonds().iter().any(|b| b.order == BondOrder::Double));
    }

    #[test]
    fn test_bracket_atoms() {
        let mol = parse_smiles("[NH4+].[Cl-]").unwrap();
        assert_eq!(mol.n_atoms(), 2);
        assert!(mol.bonds().is_empty());
        assert_eq!(mol.atoms()[0].charge, 1);
        assert_eq!(mol.total_h(0), 4);
        assert_eq!(mol.atoms()[1].symbol, "Cl");
        assert_eq!(mol.atoms()[1].charge, -1);

        let mol = parse_smiles("c1cc[nH]c1").unwrap();
        assert!(mol.atoms()[3].aromatic);
        assert_eq!(mol.total_h(3), 1);
        assert!(mol.in_ring_of_size(3, 5));

        let mol = parse_smiles("[13CH3][C@@H](O)[Fe+2]").unwrap();
        assert_eq!(mol.atoms()[0].explicit_h, Some(3));
        assert_eq!(mol.atoms()[3].symbol, "Fe");
        assert_eq!(mol.atoms()[3].charge, 2);
    }

    #[test]
    fn test_two_letter_organic_atoms() {
        let mol = parse_smiles("ClCBr").unwrap();
        let symbols: Vec<_> = mol.atoms().iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["Cl", "C", "Br"]);
        assert_eq!(mol.total_h(1), 2);
    }

    #[test]
    fn test_percent_ring_closure() {
        let mol = parse_smiles("C%10CCCC%10").unwrap();
        assert_eq!(mol.bonds().len(), 5);
        assert!(mol.in_ring_of_size(0, 5));
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(parse_smiles("").unwrap_err(), SmilesError::Empty);
        assert!(matches!(
            parse_smiles("C1CC").unwrap_err(),
            SmilesError::UnclosedRing(1)
        ));
        assert!(matches!(
            parse_smiles("CC(C").unwrap_err(),
            SmilesError::UnbalancedBranch(_)
        ));
        assert!(matches!(
            parse_smiles("CC)").unwrap_err(),
            SmilesError::UnbalancedBranch(_)
        ));
        assert!(matches!(
            parse_smiles("[CH3").unwrap_err(),
            SmilesError::UnterminatedBracket(0)
        ));
        assert!(matches!(
            parse_smiles("CC=").unwrap_err(),
            SmilesError::DanglingBond(2)
        ));
        assert!(matches!(
            parse_smiles("not a smiles").unwrap_err(),
            SmilesError::UnexpectedChar { .. }
        ));
    }
}
