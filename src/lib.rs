//! Dimensions Compute - schema-driven multi-dimensional streaming aggregation
//!
//! This library provides a streaming aggregation operator that:
//! - Fans every event out across all configured dimension combinations
//! - Merges each projection into every bound aggregator (sum, count, min, max, avg)
//! - Accumulates per-key aggregates for a window and flushes them on window close
//! - Optionally passes converted events straight through instead of accumulating

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Dimension schemas, fan-out dispatch, aggregate slots and windowing
pub mod dimensions;

// Re-export main types
pub use config::Config;
pub use dimensions::{
    AggregateRecord, AggregatorRegistry, DimensionalSchema, DimensionsComputation, EmitMode,
    FailurePolicy, SchemaDefinition,
};
pub use error::{Error, Result};
pub use types::{FieldType, FieldValue};
