//! Configuration management for the dimensions engine
//!
//! TOML configuration files with environment variable overrides and
//! sensible defaults. The schema definition is carried in the same file
//! under `[schema]`.
//!
//! ```toml
//! [engine]
//! schema_id = 1
//! emit_mode = "accumulate"
//! failure_policy = "skip_pair"
//!
//! [monitoring]
//! log_level = "info"
//!
//! [schema]
//! time_field = "ts"
//!
//! [[schema.keys]]
//! name = "city"
//! type = "string"
//!
//! [[schema.values]]
//! name = "amount"
//! type = "float"
//! aggregators = ["sum", "count", "avg"]
//!
//! [[schema.dimensions]]
//! combination = ["city"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dimensions::{
    EmitMode, FailurePolicy, SchemaDefinition, DEFAULT_SCHEMA_ID, DEFAULT_SLOT_CAPACITY,
};
use crate::error::{ConfigurationError, Error, Result};
use crate::types::SchemaId;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Operator settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Schema definition
    #[serde(default)]
    pub schema: Option<SchemaDefinition>,
}

/// Operator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Schema id stamped on emitted aggregates
    #[serde(default = "default_schema_id")]
    pub schema_id: SchemaId,

    /// Accumulate until window close, or emit every converted event
    #[serde(default)]
    pub emit_mode: EmitMode,

    /// Conversion failure handling
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Initial key capacity of each aggregate slot
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub structured_logging: bool,
}

// Default value functions
fn default_schema_id() -> SchemaId { DEFAULT_SCHEMA_ID }
fn default_slot_capacity() -> usize { DEFAULT_SLOT_CAPACITY }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_id: default_schema_id(),
            emit_mode: EmitMode::default(),
            failure_policy: FailurePolicy::default(),
            slot_capacity: default_slot_capacity(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents).map_err(|e| match e {
            Error::Serialization(msg) => {
                Error::Serialization(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(schema_id) = std::env::var("DIMENSIONS_SCHEMA_ID") {
            if let Ok(id) = schema_id.parse() {
                self.engine.schema_id = id;
            }
        }
        if let Ok(mode) = std::env::var("DIMENSIONS_EMIT_MODE") {
            if let Some(mode) = EmitMode::parse(&mode) {
                self.engine.emit_mode = mode;
            }
        }
        if let Ok(policy) = std::env::var("DIMENSIONS_FAILURE_POLICY") {
            if let Some(policy) = FailurePolicy::parse(&policy) {
                self.engine.failure_policy = policy;
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    ///
    /// The schema itself is validated when it is resolved.
    pub fn validate(&self) -> Result<()> {
        if self.engine.slot_capacity > 100_000_000 {
            return Err(ConfigurationError::Invalid(
                "Slot capacity cannot exceed 100M".to_string(),
            )
            .into());
        }

        let level = self.monitoring.log_level.to_lowercase();
        if !level.contains('=') && !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigurationError::Invalid(format!(
                "Unknown log level '{}'",
                self.monitoring.log_level
            ))
            .into());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.schema_id, 1);
        assert_eq!(config.engine.emit_mode, EmitMode::Accumulate);
        assert_eq!(config.engine.failure_policy, FailurePolicy::SkipPair);
        assert!(config.monitoring.metrics_enabled);
        assert!(config.schema.is_none());
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.monitoring.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.monitoring.log_level = "dimensions_compute=debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [engine]
            emit_mode = "pass_through"
            failure_policy = "fail_event"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.schema_id, 1);
        assert_eq!(config.engine.emit_mode, EmitMode::PassThrough);
        assert_eq!(config.engine.failure_policy, FailurePolicy::FailEvent);
        assert_eq!(config.engine.slot_capacity, DEFAULT_SLOT_CAPACITY);
    }

    #[test]
    fn test_bad_toml_is_serialization_error() {
        let err = Config::from_toml("[engine]\nemit_mode = \"batch\"").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("DIMENSIONS_SCHEMA_ID", "42");
        std::env::set_var("DIMENSIONS_EMIT_MODE", "pass-through");
        let config = Config::from_env();
        assert_eq!(config.engine.schema_id, 42);
        assert_eq!(config.engine.emit_mode, EmitMode::PassThrough);
        std::env::remove_var("DIMENSIONS_SCHEMA_ID");
        std::env::remove_var("DIMENSIONS_EMIT_MODE");
    }
}
