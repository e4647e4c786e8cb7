//! Core data types used throughout the dimensions engine
//!
//! # Key Types
//!
//! - **`FieldType`**: Declared type of a key or value field
//! - **`FieldValue`**: A single typed field value carried by events and aggregates
//! - **`FieldDescriptor`**: Ordered field name → (type, nullable) mapping
//! - **`KeyTuple`**: The projected group-by key of an event
//! - **`TimeBucket`**: Time granularity used to bucket timestamps into keys
//!
//! # Example
//!
//! ```rust
//! use dimensions_compute::types::{FieldDescriptor, FieldSpec, FieldType, FieldValue, TimeBucket};
//!
//! let descriptor = FieldDescriptor::new(vec![
//!     FieldSpec::required("city", FieldType::String),
//!     FieldSpec::nullable("zip", FieldType::Integer),
//! ]);
//! assert_eq!(descriptor.index_of("zip"), Some(1));
//!
//! assert!(FieldType::Float.matches(&FieldValue::Integer(3)));
//! assert_eq!(TimeBucket::Minute.truncate(61_500), 60_000);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Dense identifier of a dimension combination (declaration order in the schema)
pub type CombinationId = usize;

/// Numeric identifier of an aggregator, assigned by the aggregator registry
pub type AggregatorId = u32;

/// Identifier stamped on every aggregate produced by one engine instance
pub type SchemaId = u32;

/// Projected key of an event: one value per field of the key descriptor
pub type KeyTuple = Vec<FieldValue>;

// ============================================================================
// Field Types
// ============================================================================

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Boolean
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point
    Float,
    /// UTF-8 string
    String,
}

impl FieldType {
    /// Check if a value matches this type
    ///
    /// Integers are accepted where floats are declared. `Null` matches no type;
    /// nullability is a property of the field, not of its type.
    pub fn matches(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (FieldType::Boolean, FieldValue::Boolean(_)) => true,
            (FieldType::Integer, FieldValue::Integer(_)) => true,
            (FieldType::Float, FieldValue::Float(_)) => true,
            (FieldType::Float, FieldValue::Integer(_)) => true,
            (FieldType::String, FieldValue::String(_)) => true,
            _ => false,
        }
    }

    /// Whether numeric aggregators can consume this type
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    /// Get the type name as a string
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Some(FieldType::Boolean),
            "integer" | "int" | "long" | "i64" => Some(FieldType::Integer),
            "float" | "double" | "f64" => Some(FieldType::Float),
            "string" | "str" => Some(FieldType::String),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Field Values
// ============================================================================

/// A single typed field value
///
/// Floats compare and hash by bit pattern so that values can be part of a
/// [`KeyTuple`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Absent value of a nullable field
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// UTF-8 string value
    String(String),
}

impl FieldValue {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
        }
    }

    /// Check for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Try to get as f64 (converts integers to float)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Coerce a value that matched `field_type` into that type's canonical variant
    pub(crate) fn coerce_to(self, field_type: FieldType) -> Self {
        match (field_type, self) {
            (FieldType::Float, FieldValue::Integer(v)) => FieldValue::Float(v as f64),
            (_, other) => other,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::String(a), FieldValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            FieldValue::Null => {}
            FieldValue::Boolean(v) => v.hash(state),
            FieldValue::Integer(v) => v.hash(state),
            FieldValue::Float(v) => v.to_bits().hash(state),
            FieldValue::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

// ============================================================================
// Field Descriptors
// ============================================================================

/// Name, type and nullability of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field may be absent or null
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSpec {
    /// Create a non-nullable field
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    /// Create a nullable field
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }
}

/// Ordered mapping from field name to (type, nullable)
///
/// Used for both key and value projections. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    fields: Vec<FieldSpec>,
    positions: HashMap<String, usize>,
}

impl FieldDescriptor {
    /// Build a descriptor; later duplicates of a name shadow earlier lookups
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        let positions = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self { fields, positions }
    }

    /// Descriptor with no fields
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the descriptor has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Field names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

// ============================================================================
// Time Buckets
// ============================================================================

/// Time granularity applied to a dimension combination's time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    /// One second
    Second,
    /// One minute
    Minute,
    /// One hour
    Hour,
    /// One day (UTC)
    Day,
}

impl TimeBucket {
    /// Bucket width in milliseconds
    pub fn width_ms(&self) -> i64 {
        match self {
            TimeBucket::Second => 1_000,
            TimeBucket::Minute => 60_000,
            TimeBucket::Hour => 3_600_000,
            TimeBucket::Day => 86_400_000,
        }
    }

    /// Truncate an epoch-millisecond timestamp to the start of its bucket
    ///
    /// Negative timestamps round toward negative infinity.
    pub fn truncate(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.width_ms())
    }
}
