//! IPS Model & Factor Registry: loads a user's policy, normalizes
//! its weights, and evaluates individual factors against a context bundle.

pub mod context;
pub mod factors;
pub mod model;
pub mod registry;

pub use context::FactorContext;
pub use model::{normalize_and_validate, InMemoryIpsStore, IpsStore};
pub use registry::evaluate;
