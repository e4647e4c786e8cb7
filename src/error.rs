//! Error types for the dimensions engine

use thiserror::Error;

use crate::types::{CombinationId, FieldType};

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Schema or engine configuration is invalid; raised at setup only
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A raw event could not be projected onto the active descriptors
    #[error("Field resolution error: {0}")]
    FieldResolution(#[from] FieldResolutionError),

    /// Operation not allowed in the current window state
    #[error("Cannot {operation} while window controller is {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The controller state at the time of the call
        state: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Setup-time schema errors
///
/// Any of these prevents the engine from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Schema declares no dimension combinations
    #[error("Schema defines no dimension combinations")]
    EmptySchema,

    /// Combination resolves to an empty key descriptor
    #[error("Dimension combination {combination} has an empty key descriptor")]
    EmptyKeyDescriptor {
        /// Offending combination
        combination: CombinationId,
    },

    /// Combination has no aggregators bound to it
    #[error("Dimension combination {combination} has no aggregators")]
    NoAggregators {
        /// Offending combination
        combination: CombinationId,
    },

    /// Combination references an undeclared key field
    #[error("Dimension combination {combination} references unknown key field '{field}'")]
    UnknownKeyField {
        /// Offending combination
        combination: CombinationId,
        /// Undeclared field name
        field: String,
    },

    /// Value names an aggregator with no registered merge implementation
    #[error("Value '{field}' references unknown aggregator '{aggregator}'")]
    UnknownAggregator {
        /// Value field naming the aggregator
        field: String,
        /// Unregistered aggregator name
        aggregator: String,
    },

    /// Aggregator cannot consume the value field's type
    #[error("Aggregator '{aggregator}' cannot aggregate field '{field}' of type {field_type}")]
    TypeMismatch {
        /// Aggregator name
        aggregator: String,
        /// Value field name
        field: String,
        /// Declared field type
        field_type: FieldType,
    },

    /// A field name is declared more than once
    #[error("Field '{0}' is declared more than once")]
    DuplicateField(String),

    /// A bucketed combination exists but no usable time field is declared
    #[error("Dimension combination {combination} uses a time bucket but the schema has no time field")]
    MissingTimeField {
        /// Offending combination
        combination: CombinationId,
    },

    /// Other invalid setting
    #[error("{0}")]
    Invalid(String),
}

/// Event-time conversion errors
///
/// Raised by an [`EventConverter`](crate::dimensions::EventConverter) when a raw
/// event cannot satisfy the active key or value descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldResolutionError {
    /// Required field is absent from the event
    #[error("Missing required field '{field}'")]
    MissingField {
        /// Field name
        field: String,
    },

    /// Field is present but has the wrong type
    #[error("Field '{field}' expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Declared type
        expected: FieldType,
        /// Type name of the received value
        actual: &'static str,
    },

    /// Field is null but not declared nullable
    #[error("Field '{field}' is null but not nullable")]
    NullNotAllowed {
        /// Field name
        field: String,
    },

    /// Float field carries NaN
    #[error("Field '{field}' is NaN")]
    NotANumber {
        /// Field name
        field: String,
    },

    /// Converter produced a tuple that does not match the active descriptor
    #[error("Converter produced {actual} {tuple} fields, descriptor has {expected}")]
    ArityMismatch {
        /// `key` or `value`
        tuple: &'static str,
        /// Descriptor length
        expected: usize,
        /// Tuple length
        actual: usize,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: Error = FieldResolutionError::MissingField {
            field: "city".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Field resolution error: Missing required field 'city'"
        );

        let err: Error = ConfigurationError::TypeMismatch {
            aggregator: "sum".to_string(),
            field: "name".to_string(),
            field_type: FieldType::String,
        }
        .into();
        assert!(err.to_string().contains("cannot aggregate field 'name' of type string"));
    }
}
