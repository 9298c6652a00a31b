//! Configuration management for the harvest data-access layer
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with HARVEST__ prefix, nested keys also
//!    joined by `__` (HARVEST__DATABASE__URL, HARVEST__ENVIRONMENT)

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppResult;
use crate::services::UpdatePolicy;
use crate::telemetry::LogFormat;

const ENV_PREFIX: &str = "HARVEST";
const ENV_SEPARATOR: &str = "__";

/// Selects the `config/{environment}` file and fills `Config::environment`
pub const ENVIRONMENT_VAR: &str = "HARVEST__ENVIRONMENT";

/// Main configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Database configuration
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,

    /// Deadline applied to each store call, if any
    pub operation_timeout_secs: Option<u64>,

    /// Report updates that match no harvest as not found
    pub require_update_match: bool,
}

impl Config {
    /// Load configuration from `.env`, files and environment variables
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        // Same variable the environment source maps onto `environment`
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".into());

        let config = Self::defaults(&environment)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (HARVEST__ prefix)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Builder seeded with default values only
    pub fn defaults(environment: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("environment", environment)?
            .set_default("log_format", "pretty")?
            .set_default("database.url", "postgres://localhost:5432/harvest")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.require_update_match", false)
    }
}

impl DatabaseConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        if self.require_update_match {
            UpdatePolicy::RequireMatch
        } else {
            UpdatePolicy::Lenient
        }
    }
}
