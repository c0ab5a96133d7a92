//! Reaction energy: a static expansion over reactant/product
//! molecules with per-molecule stoichiometric coefficients, spawning one
//! singlepoint per molecule and finalizing with the weighted sum.

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
    /// Parallel to `molecule_ids`; e.g. `[-1.0, -1.0, 1.0, 1.0]` for
    /// `A + B -> C + D`.
    stoichiometry: Vec<f64>,
    child_specification: Specification,
    spawned: bool,
}

pub struct ReactionVariant;

#[async_trait]
impl ServiceVariant for ReactionVariant {
    fn record_type(&self) -> RecordType {
        RecordType::Reaction
    }

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value> {
        let Specification::Reaction(svc) = specification else {
            return Err(BrokerError::InvalidInput(
                "reaction variant requires a Reaction specification".to_string(),
            ));
        };
        let stoichiometry = svc
            .keywords
            .values
            .get("stoichiometry")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect::<Vec<_>>())
            .filter(|v| v.len() == inputs.molecule_ids.len())
            .unwrap_or_else(|| vec![1.0; inputs.molecule_ids.len()]);

        let state = State {
            molecule_ids: inputs.molecule_ids.clone(),
            stoichiometry,
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

        let reaction_energy: f64 = state
            .stoichiometry
            .iter()
            .zip(completed_children.iter())
            .filter_map(|(coefficient, outcome)| outcome.outputs.return_result.map(|r| coefficient * r))
            .sum();

        Ok(IterateOutcome::Done {
            outputs: RecordOutputs {
                return_result: Some(reaction_energy),
                ..Default::default()
            },
        })
    }
}
