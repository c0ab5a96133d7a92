//! Molecule endpoints: bulk add, bulk get, lookup by hash.
//!
//! `MoleculeQueryFilter::molecular_formula`/`identifier` aren't backed by a
//! port-trait query path (`MoleculeStore` only indexes by id and hash); a
//! query that sets either returns `invalid_input` rather than silently
//! ignoring the filter.

use axum::{
    extract::State,
    routing::post,
    Extension, Json, Router,
};
use qcbroker_core::error::BrokerError;
use qcbroker_core::principal::{Permission, Principal};
use qcbroker_types::api::{BulkGetRequest, InsertMetadata, MoleculeQueryFilter};
use qcbroker_types::Molecule;
use serde::Serialize;

use crate::auth::require;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/molecules", post(add_molecules))
        .route("/molecules/bulkGet", post(bulk_get))
        .route("/molecules/query", post(query_molecules))
}

#[derive(Debug, Serialize)]
struct AddMoleculesResponse {
    meta: InsertMetadata,
    ids: Vec<i64>,
}

async fn add_molecules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(molecules): Json<Vec<Molecule>>,
) -> Result<Json<AddMoleculesResponse>, AppError> {
    require(&principal, Permission::Write)?;
    let outcome = state.record_service.add_molecules(&molecules).await?;
    Ok(Json(AddMoleculesResponse {
        ids: outcome.ids,
        meta: InsertMetadata {
            inserted_idx: outcome.inserted_idx,
            existing_idx: outcome.existing_idx,
            errors: outcome.errors,
        },
    }))
}

async fn bulk_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<BulkGetRequest>,
) -> Result<Json<Vec<Option<Molecule>>>, AppError> {
    require(&principal, Permission::Read)?;
    let molecules = state.record_service.get_molecules(&request.ids, request.missing_ok).await?;
    Ok(Json(molecules))
}

async fn query_molecules(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(filter): Json<MoleculeQueryFilter>,
) -> Result<Json<Vec<Option<Molecule>>>, AppError> {
    require(&principal, Permission::Read)?;
    if filter.molecular_formula.is_some() || filter.identifier.is_some() {
        return Err(AppError(BrokerError::InvalidInput(
            "molecule query by formula or identifier is not supported; use molecule_ids or molecule_hash".to_string(),
        )));
    }
    if let Some(ids) = filter.molecule_ids {
        let molecules = state.record_service.get_molecules(&ids, true).await?;
        return Ok(Json(molecules));
    }
    let hashes = filter.molecule_hash.unwrap_or_default();
    let mut out = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let id = state.molecules.find_by_hash(&hash).await?;
        match id {
            Some(id) => out.extend(state.record_service.get_molecules(&[id], true).await?),
            None => out.push(None),
        }
    }
    Ok(Json(out))
}
