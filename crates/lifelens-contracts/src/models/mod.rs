mod registry;
mod selectors;

pub use registry::{CostClass, ProviderCatalog, ProviderRole, ProviderSpec};
pub use selectors::{ProviderSelection, ProviderSelector};
