pub use crate::registry::{RegistryError, Snapshot, Validator, ValidatorRegistry};
pub use crate::status_tracker::{refresh_statuses, run_status_tracker, try_refresh_statuses};

mod registry;
mod status_tracker;
