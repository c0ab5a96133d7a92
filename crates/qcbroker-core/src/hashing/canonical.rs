//! Canonical-form encoders. Each `canonical_*` function
//! produces a deterministic byte string for its entity; `super::hash_bytes`
//! turns that into the versioned hex digest.
//!
//! Numbers are canonicalized through `canonical_f64`/`round_to` so that
//! `1.0` and `1.00000000001` (within tolerance) and `1.0`/`1` serialize
//! identically. JSON values canonicalize through `canonical_json`, which
//! sorts object keys at every level — `serde_json::Value`'s own `Ord` isn't
//! enough since maps don't sort recursively by default in our encoding.

use qcbroker_types::{Bond, KeywordSet, Molecule, Specification};
use serde_json::Value;
use std::fmt::Write as _;

const GEOMETRY_TOLERANCE: f64 = 1e-8;
const MASS_TOLERANCE: f64 = 1e-6;
const CHARGE_TOLERANCE: f64 = 1e-4;

fn round_to(value: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return value;
    }
    (value / tolerance).round() * tolerance
}

/// Canonical decimal rendering: integer-valued floats drop the trailing
/// `.0` so `1.0` and `1` agree.
fn canonical_f64(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{}", value as i64)
    } else {
        format!("{value:.12}")
    }
}

fn push_bond(out: &mut String, bond: &Bond) {
    let _ = write!(out, "({},{},{})", bond.i, bond.j, canonical_f64(bond.order));
}

/// Lower-cases fields documented as case-insensitive: `program`, `method`, `basis`. Everything else is preserved.
pub fn normalize_program_field(value: &str) -> String {
    value.to_lowercase()
}

/// Canonical sentinel for "no basis set" so omission matches across
/// submissions.
pub fn normalize_basis(basis: Option<&str>) -> String {
    match basis {
        Some(b) if !b.trim().is_empty() => normalize_program_field(b),
        _ => "__no_basis__".to_string(),
    }
}

pub fn canonical_molecule(m: &Molecule) -> String {
    let mut out = String::new();
    out.push_str("symbols=[");
    out.push_str(&m.symbols.join(","));
    out.push_str("];geometry=[");
    for (idx, coord) in m.geometry.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&canonical_f64(round_to(*coord, GEOMETRY_TOLERANCE)));
    }
    out.push_str("];masses=[");
    if let Some(masses) = &m.masses {
        for (idx, mass) in masses.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&canonical_f64(round_to(*mass, MASS_TOLERANCE)));
        }
    }
    let _ = write!(
        out,
        "];charge={};multiplicity={}",
        canonical_f64(round_to(m.molecular_charge, CHARGE_TOLERANCE)),
        m.molecular_multiplicity
    );
    out.push_str(";real_atoms=[");
    if let Some(flags) = &m.real_atoms {
        for (idx, flag) in flags.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(if *flag { "1" } else { "0" });
        }
    }
    out.push_str("];fragments=[");
    if let Some(fragments) = &m.fragments {
        for (idx, frag) in fragments.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push('[');
            out.push_str(
                &frag
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push(']');
        }
    }
    out.push_str("];fragment_charges=[");
    if let Some(charges) = &m.fragment_charges {
        for (idx, charge) in charges.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&canonical_f64(round_to(*charge, CHARGE_TOLERANCE)));
        }
    }
    out.push_str("];fragment_multiplicities=[");
    if let Some(mults) = &m.fragment_multiplicities {
        out.push_str(
            &mults
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    out.push_str("];connectivity=[");
    if let Some(bonds) = &m.connectivity {
        let mut sorted: Vec<&Bond> = bonds.iter().collect();
        sorted.sort_by_key(|b| (b.i, b.j));
        for (idx, bond) in sorted.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            push_bond(&mut out, bond);
        }
    }
    out.push(']');
    out
}

/// Sorts object keys at every nesting level and renders numbers through
/// `canonical_f64`. `comments` (a `KeywordSet`'s free-text label) is
/// intentionally excluded by the caller, not here.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => canonical_f64(f),
            None => n.to_string(),
        },
        Value::String(s) => format!("{s:?}"),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{k:?}:{}", canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

pub fn canonical_keyword_set(ks: &KeywordSet) -> String {
    let mut keys: Vec<&String> = ks.values.keys().collect();
    keys.sort();
    let rendered: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{k:?}:{}", canonical_json(&ks.values[k])))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

pub fn canonical_specification(spec: &Specification) -> String {
    canonical_specification_inner(spec)
}

fn canonical_specification_inner(spec: &Specification) -> String {
    use qcbroker_types::Specification::*;
    match spec {
        Singlepoint(sp) => canonical_singlepoint(sp),
        Optimization(opt) => format!(
            "optimization{{program={};keywords={};singlepoint={}}}",
            normalize_program_field(&opt.program),
            canonical_keyword_set(&opt.keywords),
            canonical_singlepoint(&opt.singlepoint_specification)
        ),
        Gridoptimization(svc) => canonical_service_spec("gridoptimization", svc),
        Torsiondrive(svc) => canonical_service_spec("torsiondrive", svc),
        Manybody(svc) => canonical_service_spec("manybody", svc),
        Reaction(svc) => canonical_service_spec("reaction", svc),
        Neb(svc) => canonical_service_spec("neb", svc),
    }
}

fn canonical_singlepoint(sp: &qcbroker_types::SinglepointSpec) -> String {
    format!(
        "singlepoint{{program={};driver={:?};method={};basis={};keywords={}}}",
        normalize_program_field(&sp.program),
        sp.driver,
        normalize_program_field(&sp.method),
        normalize_basis(sp.basis.as_deref()),
        canonical_keyword_set(&sp.keywords),
    )
}

fn canonical_service_spec(kind: &str, svc: &qcbroker_types::ServiceSpec) -> String {
    format!(
        "{kind}{{program={};keywords={};optimization={{program={};keywords={};singlepoint={}}}}}",
        normalize_program_field(&svc.program),
        canonical_keyword_set(&svc.keywords),
        normalize_program_field(&svc.optimization_specification.program),
        canonical_keyword_set(&svc.optimization_specification.keywords),
        canonical_singlepoint(&svc.optimization_specification.singlepoint_specification),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcbroker_types::MoleculeIdentifiers;

    fn water() -> Molecule {
        Molecule {
            symbols: vec!["O".into(), "H".into(), "H".into()],
            geometry: vec![0.0, 0.0, -0.12, 0.0, 1.43, 0.96, 0.0, -1.43, 0.96],
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
    fn sub_tolerance_geometry_differences_canonicalize_identically() {
        let mut nudged = water();
        nudged.geometry[2] += 1e-10;
        assert_eq!(canonical_molecule(&water()), canonical_molecule(&nudged));
    }

    #[test]
    fn bond_order_is_sorted_regardless_of_insertion_order() {
        let mut a = water();
        let mut b = water();
        a.connectivity = Some(vec![Bond::new(0, 1, 1.0), Bond::new(0, 2, 1.0)]);
        b.connectivity = Some(vec![Bond::new(2, 0, 1.0), Bond::new(1, 0, 1.0)]);
        assert_eq!(canonical_molecule(&a), canonical_molecule(&b));
    }

    #[test]
    fn missing_basis_normalizes_to_sentinel() {
        assert_eq!(normalize_basis(None), normalize_basis(Some("")));
    }

    #[test]
    fn program_and_method_lowercase_but_other_fields_preserved() {
        assert_eq!(normalize_program_field("PSI4"), "psi4");
    }
}
