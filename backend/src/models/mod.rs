//! Database models for the harvest data-access layer
//!
//! Re-exports models from the shared crate and adds the mapping between domain
//! shapes and stored documents

pub mod harvest;

pub use harvest::*;
pub use shared::models::*;
