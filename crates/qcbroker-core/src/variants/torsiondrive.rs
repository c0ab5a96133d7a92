//! Torsion drive: scans one dihedral at a fixed angular
//! resolution, spawning an optimization at each grid point. Grid points
//! fan out from 0° so the closest-converged neighbor is always available
//! first; which neighbor's geometry seeds the next optimization is a
//! chemistry decision the manager's optimizer makes from the payload this
//! variant builds; the engine itself never touches geometry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use qcbroker_types::{RecordOutputs, RecordStatus, RecordType, Specification};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::service_engine::{
    ChildOutcome, IterateOutcome, NewChildRequest, RecordInputs, ServiceContext, ServiceVariant,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct State {
    molecule_ids: Vec<i64>,
    child_specification: Specification,
    /// Grid points in integer degrees, ascending.
    grid_points: Vec<i32>,
    remaining: Vec<i32>,
    /// Degrees currently spawned, same order as the service's pending
    /// children so `iterate` can zip them against `completed_children`.
    in_flight: Vec<i32>,
    converged: BTreeMap<String, i64>,
}

pub struct TorsiondriveVariant;

fn grid_points(spacing_degrees: i32) -> Vec<i32> {
    let spacing = spacing_degrees.max(1);
    let mut points = Vec::new();
    let mut degree = -180;
    while degree <= 180 {
        points.push(degree);
        degree += spacing;
    }
    if !points.contains(&0) {
        points.push(0);
        points.sort_unstable();
    }
    points
}

#[async_trait]
impl ServiceVariant for TorsiondriveVariant {
    fn record_type(&self) -> RecordType {
        RecordType::Torsiondrive
    }

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value> {
        let Specification::Torsiondrive(svc) = specification else {
            return Err(BrokerError::InvalidInput(
                "torsiondrive variant requires a Torsiondrive specification".to_string(),
            ));
        };
        let spacing = svc
            .keywords
            .values
            .get("grid_spacing_degrees")
            .and_then(Value::as_i64)
            .unwrap_or(180) as i32;
        let points = grid_points(spacing);
        let mut remaining = points.clone();
        remaining.retain(|d| *d != 0);

        let state = State {
            molecule_ids: inputs.molecule_ids.clone(),
            child_specification: Specification::Optimization(svc.optimization_specification.clone()),
            grid_points: points,
            remaining,
            in_flight: Vec::new(),
            converged: BTreeMap::new(),
        };
        Ok(serde_json::to_value(state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?)
    }

    async fn iterate(
        &self,
        _ctx: &ServiceContext<'_>,
        state: Value,
        completed_children: &[ChildOutcome],
    ) -> Result<IterateOutcome> {
        let mut state: State =
            serde_json::from_value(state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?;

        for (degree, outcome) in state.in_flight.iter().zip(completed_children.iter()) {
            if outcome.status == RecordStatus::Complete {
                state.converged.insert(degree.to_string(), outcome.record_id);
            }
        }
        state.in_flight.clear();

        // Seed the center point on the first iteration, then fan out two
        // points (the next unseen positive and negative offset) per tick.
        let next_batch: Vec<i32> = if state.converged.is_empty() && completed_children.is_empty() {
            let seed = state.remaining.iter().position(|d| *d == 0);
            match seed {
                Some(idx) => vec![state.remaining.remove(idx)],
                None => state.remaining.drain(..1.min(state.remaining.len())).collect(),
            }
        } else {
            let take = 2.min(state.remaining.len());
            state.remaining.drain(..take).collect()
        };

        if next_batch.is_empty() {
            let outputs = RecordOutputs {
                extra: serde_json::Map::from_iter([(
                    "torsion_scan_degrees".to_string(),
                    serde_json::to_value(&state.converged).unwrap_or(Value::Null),
                )]),
                ..Default::default()
            };
            return Ok(IterateOutcome::Done { outputs });
        }

        state.in_flight = next_batch.clone();
        let new_children = next_batch
            .iter()
            .map(|_| NewChildRequest {
                specification: state.child_specification.clone(),
                molecule_ids: state.molecule_ids.clone(),
            })
            .collect();

        let next_state = serde_json::to_value(&state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?;
        Ok(IterateOutcome::Continue {
            new_children,
            next_due_at: chrono::Utc::now(),
            next_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_points_always_include_center() {
        let points = grid_points(90);
        assert!(points.contains(&0));
        assert_eq!(points, vec![-180, -90, 0, 90, 180]);
    }
}
