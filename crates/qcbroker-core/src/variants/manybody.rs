//! Many-body expansion: a static expansion that spawns one
//! singlepoint per input molecule (the cluster plus whatever sub-fragments
//! the caller already split out as separate molecule ids — fragment
//! combinatorics from connectivity live in `Molecule`, not here) and
//! completes once every spawned singlepoint returns.

use async_trait::async_trait;
use qcbroker_types::{RecordOutputs, RecordType, Specification};
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
    spawned: bool,
}

pub struct ManybodyVariant;

#[async_trait]
impl ServiceVariant for ManybodyVariant {
    fn record_type(&self) -> RecordType {
        RecordType::Manybody
    }

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value> {
        let Specification::Manybody(svc) = specification else {
            return Err(BrokerError::InvalidInput(
                "manybody variant requires a Manybody specification".to_string(),
            ));
        };
        let state = State {
            molecule_ids: inputs.molecule_ids.clone(),
            child_specification: Specification::Singlepoint(
                svc.optimization_specification.singlepoint_specification.clone(),
            ),
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
                .molecule_ids
                .iter()
                .map(|molecule_id| NewChildRequest {
                    specification: state.child_specification.clone(),
                    molecule_ids: vec![*molecule_id],
                })
                .collect();
            let next_state = serde_json::to_value(&state).map_err(|e| BrokerError::internal(anyhow::anyhow!(e)))?;
            return Ok(IterateOutcome::Continue {
                new_children,
                next_due_at: chrono::Utc::now(),
                next_state,
            });
        }

        let total: f64 = completed_children
            .iter()
            .filter_map(|c| c.outputs.return_result)
            .sum();

        Ok(IterateOutcome::Done {
            outputs: RecordOutputs {
                return_result: Some(total),
                ..Default::default()
            },
        })
    }
}
