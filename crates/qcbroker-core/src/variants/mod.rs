//! `ServiceVariant` implementations, one module per record
//! type named there. Each variant only decides *what children to spawn
//! next*; the server never inspects or produces chemistry —
//! grid points, convergence, and image chains are bookkeeping over opaque
//! child records, not numerical methods.

mod gridoptimization;
mod manybody;
mod neb;
mod reaction;
mod torsiondrive;

pub use gridoptimization::GridoptimizationVariant;
pub use manybody::ManybodyVariant;
pub use neb::NebVariant;
pub use reaction::ReactionVariant;
pub use torsiondrive::TorsiondriveVariant;

use crate::service_engine::ServiceVariantRegistry;
use std::sync::Arc;

/// Registers every built-in variant. `qcbroker-server` calls this once at
/// startup; tests that only need a subset register their own registry.
pub fn default_registry() -> ServiceVariantRegistry {
    let mut registry = ServiceVariantRegistry::new();
    registry.register(Arc::new(TorsiondriveVariant));
    registry.register(Arc::new(GridoptimizationVariant));
    registry.register(Arc::new(NebVariant));
    registry.register(Arc::new(ManybodyVariant));
    registry.register(Arc::new(ReactionVariant));
    registry
}
