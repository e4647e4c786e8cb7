//! Built-in aggregators and the aggregator registry
//!
//! Every aggregator is an associative, commutative merge with an identity
//! value and a finalize step. Average is never stored directly: its
//! accumulator keeps a running sum and count and the ratio is computed when
//! the aggregate is finalized.
//!
//! # Example
//!
//! ```rust
//! use dimensions_compute::dimensions::{AggregatorKind, AggregatorRegistry};
//! use dimensions_compute::types::{FieldType, FieldValue};
//!
//! let registry = AggregatorRegistry::default();
//! let (id, kind) = registry.resolve("AVG").unwrap();
//! assert_eq!(kind, AggregatorKind::Avg);
//! assert_eq!(registry.name(id), Some("avg"));
//!
//! let mut acc = kind.identity(FieldType::Float);
//! acc.update(&FieldValue::Float(2.0));
//! acc.update(&FieldValue::Float(4.0));
//! assert_eq!(acc.finalize(), FieldValue::Float(3.0));
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{AggregatorId, FieldType, FieldValue};

// ============================================================================
// Aggregator Kinds
// ============================================================================

/// Merge operation applied by an aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorKind {
    /// Sum of values
    Sum,
    /// Number of events
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Mean, stored as sum and count
    Avg,
}

impl AggregatorKind {
    /// All built-in kinds in registry order
    pub const ALL: [AggregatorKind; 5] = [
        AggregatorKind::Sum,
        AggregatorKind::Count,
        AggregatorKind::Min,
        AggregatorKind::Max,
        AggregatorKind::Avg,
    ];

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            AggregatorKind::Sum => "sum",
            AggregatorKind::Count => "count",
            AggregatorKind::Min => "min",
            AggregatorKind::Max => "max",
            AggregatorKind::Avg => "avg",
        }
    }

    /// Whether this aggregator can consume a field of the given type
    pub fn accepts(&self, field_type: FieldType) -> bool {
        match self {
            AggregatorKind::Count => true,
            _ => field_type.is_numeric(),
        }
    }

    /// Identity accumulator for a value field of `field_type`
    pub fn identity(&self, field_type: FieldType) -> Accumulator {
        match self {
            AggregatorKind::Sum => Accumulator::Sum(Number::zero(field_type)),
            AggregatorKind::Count => Accumulator::Count(0),
            AggregatorKind::Min => Accumulator::Min(None),
            AggregatorKind::Max => Accumulator::Max(None),
            AggregatorKind::Avg => Accumulator::Mean {
                sum: Number::zero(field_type),
                count: 0,
            },
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Accumulators
// ============================================================================

/// Numeric running value that keeps integer fields integral
///
/// Integers are widened to `i128` so that sums of `i64` inputs stay exact and
/// order-independent; the value only becomes a float on finalize when the
/// total no longer fits in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integer field value or running integer total
    Integer(i128),
    /// Float field value
    Float(f64),
}

impl Number {
    fn zero(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Integer => Number::Integer(0),
            _ => Number::Float(0.0),
        }
    }

    /// Numeric view of a value; nulls, non-numeric values and NaN yield `None`
    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Integer(v) => Some(Number::Integer(i128::from(*v))),
            FieldValue::Float(v) if !v.is_nan() => Some(Number::Float(*v)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Number::Integer(a.saturating_add(b)),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn less_than(self, other: Number) -> bool {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a < b,
            (a, b) => a.as_f64() < b.as_f64(),
        }
    }

    fn into_value(self) -> FieldValue {
        match self {
            Number::Integer(v) => match i64::try_from(v) {
                Ok(v) => FieldValue::Integer(v),
                Err(_) => FieldValue::Float(v as f64),
            },
            Number::Float(v) => FieldValue::Float(v),
        }
    }
}

/// Running state of one aggregator over one value field
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Running sum
    Sum(Number),
    /// Running event count
    Count(u64),
    /// Smallest value seen, if any
    Min(Option<Number>),
    /// Largest value seen, if any
    Max(Option<Number>),
    /// Running sum and count for the mean
    Mean {
        /// Sum of non-null values
        sum: Number,
        /// Number of non-null values
        count: u64,
    },
}

impl Accumulator {
    /// Fold one value into the accumulator
    ///
    /// Nulls are counted by `Count` and ignored by every other kind, as is
    /// a float NaN.
    pub fn update(&mut self, value: &FieldValue) {
        if let Accumulator::Count(n) = self {
            *n += 1;
            return;
        }
        let Some(number) = Number::from_value(value) else {
            return;
        };
        match self {
            Accumulator::Sum(total) => *total = total.add(number),
            Accumulator::Min(current) => {
                if current.map_or(true, |c| number.less_than(c)) {
                    *current = Some(number);
                }
            }
            Accumulator::Max(current) => {
                if current.map_or(true, |c| c.less_than(number)) {
                    *current = Some(number);
                }
            }
            Accumulator::Mean { sum, count } => {
                *sum = sum.add(number);
                *count += 1;
            }
            Accumulator::Count(_) => {}
        }
    }

    /// Merge another partial state of the same kind into this one
    ///
    /// States of different kinds are left untouched.
    pub fn combine(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum(a), Accumulator::Sum(b)) => *a = a.add(*b),
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (Accumulator::Min(a), Accumulator::Min(Some(b))) => {
                if a.map_or(true, |c| b.less_than(c)) {
                    *a = Some(*b);
                }
            }
            (Accumulator::Max(a), Accumulator::Max(Some(b))) => {
                if a.map_or(true, |c| c.less_than(*b)) {
                    *a = Some(*b);
                }
            }
            (
                Accumulator::Mean { sum, count },
                Accumulator::Mean {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum = sum.add(*other_sum);
                *count += other_count;
            }
            _ => {}
        }
    }

    /// Compute the emitted value
    pub fn finalize(&self) -> FieldValue {
        match self {
            Accumulator::Sum(total) => total.into_value(),
            Accumulator::Count(n) => FieldValue::Integer(i64::try_from(*n).unwrap_or(i64::MAX)),
            Accumulator::Min(v) | Accumulator::Max(v) => {
                v.map_or(FieldValue::Null, Number::into_value)
            }
            Accumulator::Mean { sum, count } => {
                if *count == 0 {
                    FieldValue::Null
                } else {
                    FieldValue::Float(sum.as_f64() / *count as f64)
                }
            }
        }
    }
}

// ============================================================================
// Aggregator Registry
// ============================================================================

/// Maps aggregator names to kinds and stable numeric ids
///
/// Ids are assigned in registration order. Aliases share the id of the name
/// they alias.
#[derive(Debug, Clone)]
pub struct AggregatorRegistry {
    by_name: HashMap<String, AggregatorId>,
    entries: Vec<(String, AggregatorKind)>,
}

impl AggregatorRegistry {
    /// Registry with no aggregators
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Register a named aggregator and return its id
    ///
    /// Re-registering an existing name returns the existing id unchanged.
    pub fn register(&mut self, name: &str, kind: AggregatorKind) -> AggregatorId {
        let key = name.to_lowercase();
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = self.entries.len() as AggregatorId;
        self.entries.push((key.clone(), kind));
        self.by_name.insert(key, id);
        id
    }

    /// Register an alternative name for an already registered aggregator
    pub fn alias(&mut self, alias: &str, name: &str) -> Option<AggregatorId> {
        let id = *self.by_name.get(&name.to_lowercase())?;
        self.by_name.entry(alias.to_lowercase()).or_insert(id);
        Some(id)
    }

    /// Resolve a name (case-insensitive) to its id and kind
    pub fn resolve(&self, name: &str) -> Option<(AggregatorId, AggregatorKind)> {
        let id = *self.by_name.get(&name.to_lowercase())?;
        self.kind(id).map(|kind| (id, kind))
    }

    /// Kind registered under an id
    pub fn kind(&self, id: AggregatorId) -> Option<AggregatorKind> {
        self.entries.get(id as usize).map(|(_, kind)| *kind)
    }

    /// Canonical name registered under an id
    pub fn name(&self, id: AggregatorId) -> Option<&str> {
        self.entries.get(id as usize).map(|(name, _)| name.as_str())
    }

    /// Number of distinct aggregators (aliases excluded)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AggregatorRegistry {
    /// Built-ins: sum=0, count=1, min=2, max=3, avg=4 (aliases `average`, `mean`)
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in AggregatorKind::ALL {
            registry.register(kind.name(), kind);
        }
        registry.alias("average", "avg");
        registry.alias("mean", "avg");
        registry
    }
}
