//! Error handling for the harvest data-access layer
//!
//! Every store failure is wrapped with the operation and collection it came
//! from. Nothing is logged-and-dropped here; callers decide how to report.

use serde::Serialize;
use shared::ObjectIdError;
use thiserror::Error;

use crate::store::{Collection, StoreError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Input errors
    #[error("Invalid identifier {value:?}: {source}")]
    InvalidIdentifier {
        value: String,
        #[source]
        source: ObjectIdError,
    },

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Store errors
    #[error("{operation} failed to query {collection}: {source}")]
    Query {
        operation: &'static str,
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed to aggregate {collection}: {source}")]
    Aggregation {
        operation: &'static str,
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed to insert into {collection}: {source}")]
    Insert {
        operation: &'static str,
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed to update {collection}: {source}")]
    Update {
        operation: &'static str,
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error("{operation} could not decode a {collection} document: {source}")]
    Decode {
        operation: &'static str,
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
}

/// Error detail an API layer can hand back to its clients
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Query { .. } => "QUERY_ERROR",
            AppError::Aggregation { .. } => "AGGREGATION_ERROR",
            AppError::Insert { .. } => "INSERT_ERROR",
            AppError::Update { .. } => "UPDATE_ERROR",
            AppError::Decode { .. } => "DECODE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Store timeouts and connectivity failures, which a caller may retry
    pub fn is_transient(&self) -> bool {
        let source = match self {
            AppError::Query { source, .. }
            | AppError::Aggregation { source, .. }
            | AppError::Insert { source, .. }
            | AppError::Update { source, .. } => source,
            _ => return false,
        };
        matches!(
            source,
            StoreError::Timeout(_)
                | StoreError::Database(sqlx::Error::PoolTimedOut)
                | StoreError::Database(sqlx::Error::Io(_))
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        let field = match self {
            AppError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
            field,
        }
    }

    pub(crate) fn invalid_identifier(value: &str, source: ObjectIdError) -> Self {
        AppError::InvalidIdentifier {
            value: value.to_string(),
            source,
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for the data-access layer
pub type AppResult<T> = Result<T, AppError>;
