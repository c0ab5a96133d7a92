//! Grid optimization: like a torsion drive but scans linear
//! combinations of constrained internal coordinates rather than a single
//! dihedral. Coordinates are named in `keywords.values["scan_dimensions"]`
//! as `{name: [values...]}`; the variant spawns one optimization per point
//! of the Cartesian product in a single batch, then waits for all of them.

use async_trait::async_trait;
use qcbroker_types::{RecordOutputs, RecordType, Specification};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{BrokerError, Result};
use crate::service_engine::{
    ChildOutcome, IterateOutcome, NewChildRequest, RecordInputs, ServiceContext, ServiceVariant,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct State {
    molecule_ids: Vec<i64>,
    child_specification: Specification,
    grid_point_labels: Vec<String>,
    spawned: bool,
}

pub struct GridoptimizationVariant;

fn cartesian_labels(dimensions: &BTreeMap<String, Vec<Value>>) -> Vec<String> {
    let mut labels = vec![String::new()];
    for (name, values) in dimensions {
        let mut next = Vec::with_capacity(labels.len() * values.len().max(1));
        for label in &labels {
            for value in values {
                let piece = format!("{name}={value}");
                next.push(if label.is_empty() {
                    piece
                } else {
                    format!("{label},{piece}")
                });
            }
        }
        labels = next;
    }
    if labels == vec![String::new()] {
        labels = vec!["origin".to_string()];
    }
    labels
}

#[async_trait]
impl ServiceVariant for GridoptimizationVariant {
    fn record_type(&self) -> RecordType {
        RecordType::Gridoptimization
    }

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value> {
        let Specification::Gridoptimization(svc) = specification else {
            return Err(BrokerError::InvalidInput(
                "gridoptimization variant requires a Gridoptimization specification".to_string(),
            ));
        };
        let dimensions: BTreeMap<String, Vec<Value>> = svc
            .keywords
            .values
            .get("scan_dimensions")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.as_array().cloned().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        let state = State {
            molecule_ids: inputs.molecule_ids.clone(),
            child_specification: Specification::Optimization(svc.optimization_specification.clone()),
            grid_point_labels: cartesian_labels(&dimensions),
            spawned: false,
        };
        serde_json::to_value(state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))
    }

    async fn iterate(
        &self,
        _ctx: &ServiceContext<'_>,
        state: Value,
        completed_children: &[ChildOutcome],
    ) -> Result<IterateOutcome> {
        let mut state: State =
            serde_json::from_value(state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?;

        if !state.spawned {
            state.spawned = true;
            let new_children = state
                .grid_point_labels
                .iter()
                .map(|_| NewChildRequest {
                    specification: state.child_specification.clone(),
                    molecule_ids: state.molecule_ids.clone(),
                })
                .collect();
            let next_state = serde_json::to_value(&state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?;
            return Ok(IterateOutcome::Continue {
                new_children,
                next_due_at: chrono::Utc::now(),
                next_state,
            });
        }

        let converged = state
            .grid_point_labels
            .iter()
            .zip(completed_children.iter())
            .map(|(label, outcome)| (label.clone(), outcome.record_id))
            .collect::<BTreeMap<_, _>>();

        Ok(IterateOutcome::Done {
            outputs: RecordOutputs {
                extra: serde_json::Map::from_iter([(
                    "grid_points".to_string(),
                    serde_json::to_value(&converged).unwrap_or(Value::Null),
                )]),
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_labels_cover_every_combination() {
        let mut dims = BTreeMap::new();
        dims.insert("r1".to_string(), vec![Value::from(1.0), Value::from(2.0)]);
        dims.insert("r2".to_string(), vec![Value::from(0.5)]);
        assert_eq!(cartesian_labels(&dims).len(), 2);
    }
}
