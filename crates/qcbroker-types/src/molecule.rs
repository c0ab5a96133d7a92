//! Molecule — immutable chemical structure, unique by molecule hash.
//!
//! A `Molecule` is never mutated after construction. Two submissions that
//! canonicalize to the same projection (see `qcbroker-core::hashing`)
//! collapse to the same stored row.

use serde::{Deserialize, Serialize};

/// A bonded pair within `connectivity`, endpoints stored in sorted order so
/// that `(a, b)` and `(b, a)` canonicalize identically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bond {
    pub i: u32,
    pub j: u32,
    /// Bond order, e.g. 1.0 single, 1.5 aromatic, 2.0 double.
    pub order: f64,
}

impl Bond {
    pub fn new(i: u32, j: u32, order: f64) -> Self {
        if i <= j {
            Self { i, j, order }
        } else {
            Self { i: j, j: i, order }
        }
    }
}

/// Cross-reference identifiers carried alongside the molecule but excluded
/// from the hash (they're derived/informational, not structural).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoleculeIdentifiers {
    pub molecular_formula: Option<String>,
    pub molecule_hash: Option<String>,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub smiles: Option<String>,
}

/// Immutable molecular structure.
///
/// `symbols` and `geometry` are ordered and atom order is part of identity:
/// two structurally-identical molecules with different atom orderings hash
/// differently, by design (spec §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    /// Element symbols, one per atom, in submission order.
    pub symbols: Vec<String>,
    /// Flat `[x0, y0, z0, x1, y1, z1, ...]` geometry in bohr.
    pub geometry: Vec<f64>,
    /// Per-atom mass in amu; defaults to the standard isotopic mass when absent.
    pub masses: Option<Vec<f64>>,
    pub molecular_charge: f64,
    pub molecular_multiplicity: i32,
    /// Ghost/dummy-atom flags; `real_atoms[i] == false` excludes atom `i` from
    /// real-atom-only properties without removing it from the geometry.
    #[serde(default)]
    pub real_atoms: Option<Vec<bool>>,
    /// Atom indices grouped into fragments, e.g. `[[0,1,2],[3,4]]`.
    #[serde(default)]
    pub fragments: Option<Vec<Vec<u32>>>,
    #[serde(default)]
    pub fragment_charges: Option<Vec<f64>>,
    #[serde(default)]
    pub fragment_multiplicities: Option<Vec<i32>>,
    #[serde(default)]
    pub connectivity: Option<Vec<Bond>>,
    #[serde(default)]
    pub identifiers: MoleculeIdentifiers,
}

impl Molecule {
    pub fn n_atoms(&self) -> usize {
        self.symbols.len()
    }

    /// Structural validity: geometry length matches 3 * n_atoms, and any
    /// optional per-atom vector (masses, real_atoms) matches n_atoms too.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.n_atoms();
        if self.geometry.len() != 3 * n {
            return Err(format!(
                "geometry has {} entries, expected {} (3 * {} atoms)",
                self.geometry.len(),
                3 * n,
                n
            ));
        }
        if let Some(masses) = &self.masses {
            if masses.len() != n {
                return Err(format!("masses has {} entries, expected {n}", masses.len()));
            }
        }
        if let Some(flags) = &self.real_atoms {
            if flags.len() != n {
                return Err(format!(
                    "real_atoms has {} entries, expected {n}",
                    flags.len()
                ));
            }
        }
        if let Some(fragments) = &self.fragments {
            let covered: usize = fragments.iter().map(|f| f.len()).sum();
            if covered != n {
                return Err(format!(
                    "fragments cover {covered} atoms, expected all {n}"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Molecule {
        Molecule {
            symbols: vec!["O".into(), "H".into(), "H".into()],
            geometry: vec![
                0.0, 0.0, -0.12, 0.0, 1.43, 0.96, 0.0, -1.43, 0.96,
            ],
            masses: None,
            molecular_charge: 0.0,
            molecular_multiplicity: 1,
            real_atoms: None,
            fragments: None,
            fragment_charges: None,
            fragment_multiplicities: None,
            connectivity: None,
            identifiers: MoleculeIdentifiers::default(),
        }
    }

    #[test]
    fn validate_accepts_consistent_geometry() {
        assert!(water().validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_geometry_length() {
        let mut m = water();
        m.geometry.pop();
        assert!(m.validate().is_err());
    }

    #[test]
    fn bond_endpoints_sort() {
        let b = Bond::new(3, 1, 1.0);
        assert_eq!((b.i, b.j), (1, 3));
    }
}
