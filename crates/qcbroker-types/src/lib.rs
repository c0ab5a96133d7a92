//! Shared wire/domain types for qcbroker.
//!
//! This crate is the single source of truth for every boundary: the HTTP
//! API, the Postgres row mappings, and the core engine's internal
//! structures all build on these types. It depends on nothing beyond
//! `serde`/`chrono`/`uuid`/`base64` — no sqlx, no axum — so it can be
//! shared by a future manager SDK without dragging in the server stack.

pub mod api;
pub mod blob;
pub mod error_kind;
pub mod keyword_set;
pub mod manager;
pub mod molecule;
pub mod record;
pub mod specification;

pub use blob::{BlobMeta, BlobPayload, ContentType};
pub use error_kind::{ErrorBody, ErrorKind};
pub use keyword_set::KeywordSet;
pub use manager::{ClaimRequest, ClaimResponse, ClaimedTask, ManagerStatus, WILDCARD_TAG};
pub use molecule::{Bond, Molecule, MoleculeIdentifiers};
pub use record::{
    Comment, ComputeHistoryEntry, ComputeOutcome, Priority, Record, RecordOutputs, RecordStatus,
    RecordType,
};
pub use specification::{
    Driver, OptimizationSpec, Protocols, ServiceSpec, SinglepointSpec, Specification,
    StoragePolicy, WavefunctionProtocol,
};
