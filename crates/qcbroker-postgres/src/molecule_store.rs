//! Postgres-backed `MoleculeStore`. Content-addressed: the
//! hash computed by `qcbroker-core::hashing` is the table's uniqueness key,
//! so `add_molecule` is always an upsert-and-return-id.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::hashing;
use qcbroker_core::ports::{BulkInsertOutcome, MoleculeStore};
use qcbroker_types::Molecule;

pub struct PgMoleculeStore {
    pool: PgPool,
}

impl PgMoleculeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts `molecule` under `hash` if absent, otherwise returns the
    /// existing row's id. Race-safe: concurrent callers racing the same
    /// hash converge on whichever insert wins `ON CONFLICT DO NOTHING`.
    async fn upsert(&self, hash: &str, molecule: &Molecule) -> Result<(i64, bool)> {
        let body = serde_json::to_value(molecule).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO qcbroker.molecules (content_hash, body)
            VALUES ($1, $2)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(hash)
        .bind(&body)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        match inserted {
            Some(id) => Ok((id, true)),
            None => {
                let id = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM qcbroker.molecules WHERE content_hash = $1",
                )
                .bind(hash)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
                Ok((id, false))
            }
        }
    }
}

#[async_trait]
impl MoleculeStore for PgMoleculeStore {
    async fn add_molecule(&self, molecule: &Molecule) -> Result<i64> {
        let hash = hashing::molecule_hash(molecule);
        let (id, _) = self.upsert(&hash, molecule).await?;
        Ok(id)
    }

    async fn add_molecules(&self, molecules: &[Molecule]) -> Result<BulkInsertOutcome> {
        let mut outcome = BulkInsertOutcome::default();
        for (idx, molecule) in molecules.iter().enumerate() {
            let hash = hashing::molecule_hash(molecule);
            match self.upsert(&hash, molecule).await {
                Ok((id, true)) => {
                    outcome.ids.push(id);
                    outcome.inserted_idx.push(idx);
                }
                Ok((id, false)) => {
                    outcome.ids.push(id);
                    outcome.existing_idx.push(idx);
                }
                Err(e) => outcome.errors.push((idx, e.to_string())),
            }
        }
        Ok(outcome)
    }

    async fn get_molecules(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<Molecule>>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let body = sqlx::query_scalar::<_, serde_json::Value>(
                "SELECT body FROM qcbroker.molecules WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

            match body {
                Some(body) => {
                    let molecule: Molecule =
                        serde_json::from_value(body).map_err(|e| BrokerError::internal(anyhow!(e)))?;
                    out.push(Some(molecule));
                }
                None if missing_ok => out.push(None),
                None => return Err(BrokerError::NotFound(format!("molecule {id}"))),
            }
        }
        Ok(out)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM qcbroker.molecules WHERE content_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(id)
    }
}
