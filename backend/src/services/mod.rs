//! Business logic services

pub mod harvest;
pub mod historic;

pub use harvest::{HarvestService, UpdatePolicy};
pub use historic::build_historic_pipeline;
