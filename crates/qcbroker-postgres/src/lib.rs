//! qcbroker-postgres — Postgres implementations of every `qcbroker-core`
//! port trait, plus the schema that backs them (`migrations/`).
//!
//! One adapter module per port trait; each is a thin newtype over
//! `PgPool`. All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`)
//! so this crate builds without a live database.

pub mod blob_store;
pub mod keyword_set_store;
pub mod manager_registry;
pub mod molecule_store;
pub mod record_store;
pub mod service_queue;
pub mod specification_store;
pub mod task_queue;
pub mod users;

pub use blob_store::PgBlobStore;
pub use keyword_set_store::PgKeywordSetStore;
pub use manager_registry::PgManagerRegistry;
pub use molecule_store::PgMoleculeStore;
pub use record_store::PgRecordStore;
pub use service_queue::PgServiceQueue;
pub use specification_store::PgSpecificationStore;
pub use task_queue::PgTaskQueue;
pub use users::PgUserStore;

use sqlx::PgPool;

/// Every adapter built from one shared pool, the way a binary wires up the
/// broker's storage layer in one place.
pub struct PgStores {
    pub molecules: PgMoleculeStore,
    pub keyword_sets: PgKeywordSetStore,
    pub specifications: PgSpecificationStore,
    pub records: PgRecordStore,
    pub tasks: PgTaskQueue,
    pub services: PgServiceQueue,
    pub managers: PgManagerRegistry,
    pub blobs: PgBlobStore,
    pub users: PgUserStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            molecules: PgMoleculeStore::new(pool.clone()),
            keyword_sets: PgKeywordSetStore::new(pool.clone()),
            specifications: PgSpecificationStore::new(pool.clone()),
            records: PgRecordStore::new(pool.clone()),
            tasks: PgTaskQueue::new(pool.clone()),
            services: PgServiceQueue::new(pool.clone()),
            managers: PgManagerRegistry::new(pool.clone()),
            blobs: PgBlobStore::new(pool.clone()),
            users: PgUserStore::new(pool),
        }
    }
}
