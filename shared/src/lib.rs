//! Shared types and models for the harvest estimation platform
//!
//! This crate contains the domain shapes shared between the backend data-access
//! layer and the components that call it.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
