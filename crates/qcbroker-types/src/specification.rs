//! Specification — immutable "how to compute" description, layered by record
//! type. Unique by spec hash (qcbroker-core::hashing).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::keyword_set::KeywordSet;
use crate::record::RecordType;

/// Wavefunction-storage granularity. Variants
/// document in their own driver which fields are meaningful at each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WavefunctionProtocol {
    None,
    OrbitalsAndEigenvalues,
    All,
}

impl Default for WavefunctionProtocol {
    fn default() -> Self {
        Self::None
    }
}

/// What of a task's outputs (stdout/stderr/native files) get persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePolicy {
    All,
    Default,
    None,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self::Default
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Protocols {
    #[serde(default)]
    pub wavefunction: WavefunctionProtocol,
    #[serde(default)]
    pub stdout: StoragePolicy,
    #[serde(default)]
    pub error_correction: BTreeMap<String, Value>,
}

/// The singlepoint layer: what quantum-chemistry program, driver, method,
/// basis, and keywords to run. Every higher-level spec embeds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglepointSpec {
    pub program: String,
    pub driver: Driver,
    pub method: String,
    /// Normalizes to a canonical "no basis" sentinel when absent, so
    /// basis-free submissions (e.g. semi-empirical methods) dedup together.
    pub basis: Option<String>,
    pub keywords: KeywordSet,
    #[serde(default)]
    pub protocols: Protocols,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Energy,
    Gradient,
    Hessian,
    Properties,
}

/// The optimization layer: a singlepoint spec plus an optimizer program and
/// its own keywords (e.g. geomeTRIC, optking).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSpec {
    pub program: String,
    pub keywords: KeywordSet,
    pub singlepoint_specification: SinglepointSpec,
    #[serde(default)]
    pub protocols: Protocols,
}

/// Service-level wrapper: every long-running workflow wraps an optimization
/// spec plus its own keywords (grid resolution, convergence thresholds, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub program: String,
    pub keywords: KeywordSet,
    pub optimization_specification: OptimizationSpec,
}

/// The tagged, record-type-scoped specification. Each arm is immutable and
/// hashes via `qcbroker-core::hashing::spec_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum Specification {
    Singlepoint(SinglepointSpec),
    Optimization(OptimizationSpec),
    Gridoptimization(ServiceSpec),
    Torsiondrive(ServiceSpec),
    Manybody(ServiceSpec),
    Reaction(ServiceSpec),
    Neb(ServiceSpec),
}

impl Specification {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Singlepoint(_) => RecordType::Singlepoint,
            Self::Optimization(_) => RecordType::Optimization,
            Self::Gridoptimization(_) => RecordType::Gridoptimization,
            Self::Torsiondrive(_) => RecordType::Torsiondrive,
            Self::Manybody(_) => RecordType::Manybody,
            Self::Reaction(_) => RecordType::Reaction,
            Self::Neb(_) => RecordType::Neb,
        }
    }

    /// The singlepoint layer at the bottom of any spec, when one exists.
    pub fn singlepoint(&self) -> Option<&SinglepointSpec> {
        match self {
            Self::Singlepoint(sp) => Some(sp),
            Self::Optimization(o) => Some(&o.singlepoint_specification),
            Self::Gridoptimization(s)
            | Self::Torsiondrive(s)
            | Self::Manybody(s)
            | Self::Reaction(s)
            | Self::Neb(s) => Some(&s.optimization_specification.singlepoint_specification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> SinglepointSpec {
        SinglepointSpec {
            program: "psi4".into(),
            driver: Driver::Energy,
            method: "hf".into(),
            basis: Some("sto-3g".into()),
            keywords: KeywordSet::default(),
            protocols: Protocols::default(),
        }
    }

    #[test]
    fn record_type_matches_arm() {
        assert_eq!(
            Specification::Singlepoint(sp()).record_type(),
            RecordType::Singlepoint
        );
    }

    #[test]
    fn singlepoint_unwraps_through_layers() {
        let opt = OptimizationSpec {
            program: "geometric".into(),
            keywords: KeywordSet::default(),
            singlepoint_specification: sp(),
            protocols: Protocols::default(),
        };
        let wrapped = Specification::Optimization(opt);
        assert_eq!(wrapped.singlepoint().unwrap().method, "hf");
    }
}
