//! Harvest estimation platform - data-access layer
//!
//! Reads and writes harvests, resolves their estimate and final production
//! references, and builds the per-farm-lot historical view. Storage sits behind
//! [`store::DocumentStore`], with a PostgreSQL JSONB store for deployments and
//! an in-memory store for tests and local runs.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::{HarvestService, UpdatePolicy};
pub use store::{Collection, DocumentStore, MemoryStore, PgDocumentStore};
