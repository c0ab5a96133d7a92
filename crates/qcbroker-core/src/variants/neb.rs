//! Nudged elastic band: iterates a chain of images, spawning
//! a gradient singlepoint per image each round. Updating image geometries
//! from those gradients is numerical chemistry the server never performs
//! — the manager's optimizer reports `outputs.extra.converged`
//! per image, and this variant only aggregates that signal.

use async_trait::async_trait;
use qcbroker_types::{Driver, RecordOutputs, RecordType, Specification};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::service_engine::{
    ChildOutcome, IterateOutcome, NewChildRequest, RecordInputs, ServiceContext, ServiceVariant,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct State {
    /// One molecule id per chain image.
    image_molecule_ids: Vec<i64>,
    child_specification: Specification,
    iteration: u32,
    max_iterations: u32,
}

pub struct NebVariant;

#[async_trait]
impl ServiceVariant for NebVariant {
    fn record_type(&self) -> RecordType {
        RecordType::Neb
    }

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value> {
        let Specification::Neb(svc) = specification else {
            return Err(BrokerError::InvalidInput(
                "neb variant requires a Neb specification".to_string(),
            ));
        };
        let max_iterations = svc
            .keywords
            .values
            .get("max_iterations")
            .and_then(Value::as_u64)
            .unwrap_or(50) as u32;

        let mut gradient_spec = svc.optimization_specification.singlepoint_specification.clone();
        gradient_spec.driver = Driver::Gradient;

        let state = State {
            image_molecule_ids: inputs.molecule_ids.clone(),
            child_specification: Specification::Singlepoint(gradient_spec),
            iteration: 0,
            max_iterations,
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

        let all_converged = !completed_children.is_empty()
            && completed_children.iter().all(|c| {
                c.outputs
                    .extra
                    .get("converged")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            });

        if all_converged || state.iteration >= state.max_iterations {
            let final_energies: Vec<Option<f64>> =
                completed_children.iter().map(|c| c.outputs.return_result).collect();
            return Ok(IterateOutcome::Done {
                outputs: RecordOutputs {
                    extra: serde_json::Map::from_iter([(
                        "image_gradient_norms".to_string(),
                        serde_json::to_value(&final_energies).unwrap_or(Value::Null),
                    )]),
                    ..Default::default()
                },
            });
        }

        state.iteration += 1;
        let new_children = state
            .image_molecule_ids
            .iter()
            .map(|molecule_id| NewChildRequest {
                specification: state.child_specification.clone(),
                molecule_ids: vec![*molecule_id],
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
