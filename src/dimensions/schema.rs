//! Schema definition and the resolved descriptor set
//!
//! A [`SchemaDefinition`] is the serde-facing description of which key fields
//! exist, which value fields are aggregated by which aggregators, and which
//! dimension combinations (group-by projections) to compute.
//! [`DimensionalSchema::build`] resolves it once at setup into the immutable
//! descriptor set the engine iterates on every event.
//!
//! # Example
//!
//! ```rust
//! use dimensions_compute::dimensions::{AggregatorRegistry, DimensionalSchema, SchemaDefinition};
//! use dimensions_compute::types::{FieldType, TimeBucket};
//!
//! let definition = SchemaDefinition::builder()
//!     .key("city", FieldType::String)
//!     .value("amount", FieldType::Float, &["sum", "count"])
//!     .time_field("ts")
//!     .dimension(&["city"])
//!     .bucketed_dimension(&["city"], TimeBucket::Day)
//!     .build();
//!
//! let schema = DimensionalSchema::build(&definition, &AggregatorRegistry::default()).unwrap();
//! assert_eq!(schema.combinations().len(), 2);
//! assert_eq!(schema.pair_count(), 4);
//! assert_eq!(schema.combinations()[1].key_descriptor().len(), 2);
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::aggregator::{AggregatorKind, AggregatorRegistry};
use crate::error::ConfigurationError;
use crate::types::{
    AggregatorId, CombinationId, FieldDescriptor, FieldSpec, FieldType, TimeBucket,
};

// ============================================================================
// Definition (configuration surface)
// ============================================================================

/// A value field and the aggregators applied to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDefinition {
    /// Field name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field may be absent or null
    #[serde(default)]
    pub nullable: bool,
    /// Aggregator names applied to this field
    pub aggregators: Vec<String>,
}

impl ValueDefinition {
    fn spec(&self) -> FieldSpec {
        FieldSpec {
            name: self.name.clone(),
            field_type: self.field_type,
            nullable: self.nullable,
        }
    }
}

/// One group-by projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDefinition {
    /// Key field names, in key order
    pub combination: Vec<String>,
    /// Optional time bucketing of the schema's time field
    #[serde(default)]
    pub bucket: Option<TimeBucket>,
    /// Values aggregated only for this combination
    #[serde(default)]
    pub additional_values: Vec<ValueDefinition>,
}

/// Serde-facing schema description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Key fields available to combinations
    pub keys: Vec<FieldSpec>,
    /// Value fields aggregated in every combination
    #[serde(default)]
    pub values: Vec<ValueDefinition>,
    /// Epoch-millisecond integer field used by bucketed combinations
    #[serde(default)]
    pub time_field: Option<String>,
    /// Dimension combinations, in evaluation order
    pub dimensions: Vec<DimensionDefinition>,
}

impl SchemaDefinition {
    /// Start a programmatic definition
    pub fn builder() -> SchemaDefinitionBuilder {
        SchemaDefinitionBuilder::default()
    }
}

/// Fluent builder for [`SchemaDefinition`]
#[derive(Debug, Default)]
pub struct SchemaDefinitionBuilder {
    keys: Vec<FieldSpec>,
    values: Vec<ValueDefinition>,
    time_field: Option<String>,
    dimensions: Vec<DimensionDefinition>,
}

impl SchemaDefinitionBuilder {
    /// Add a required key field
    pub fn key(mut self, name: &str, field_type: FieldType) -> Self {
        self.keys.push(FieldSpec::required(name, field_type));
        self
    }

    /// Add a nullable key field
    pub fn nullable_key(mut self, name: &str, field_type: FieldType) -> Self {
        self.keys.push(FieldSpec::nullable(name, field_type));
        self
    }

    /// Add a required value field aggregated by `aggregators`
    pub fn value(mut self, name: &str, field_type: FieldType, aggregators: &[&str]) -> Self {
        self.values.push(value_definition(name, field_type, false, aggregators));
        self
    }

    /// Add a nullable value field aggregated by `aggregators`
    pub fn nullable_value(
        mut self,
        name: &str,
        field_type: FieldType,
        aggregators: &[&str],
    ) -> Self {
        self.values.push(value_definition(name, field_type, true, aggregators));
        self
    }

    /// Set the time field used by bucketed combinations
    pub fn time_field(mut self, name: &str) -> Self {
        self.time_field = Some(name.to_string());
        self
    }

    /// Add a combination over `keys`
    pub fn dimension(mut self, keys: &[&str]) -> Self {
        self.dimensions.push(DimensionDefinition {
            combination: keys.iter().map(|k| k.to_string()).collect(),
            bucket: None,
            additional_values: Vec::new(),
        });
        self
    }

    /// Add a combination over `keys` plus the time field truncated to `bucket`
    pub fn bucketed_dimension(mut self, keys: &[&str], bucket: TimeBucket) -> Self {
        self.dimensions.push(DimensionDefinition {
            combination: keys.iter().map(|k| k.to_string()).collect(),
            bucket: Some(bucket),
            additional_values: Vec::new(),
        });
        self
    }

    /// Add an extra value to the most recently added combination
    pub fn additional_value(mut self, name: &str, field_type: FieldType, aggregators: &[&str]) -> Self {
        if let Some(last) = self.dimensions.last_mut() {
            last.additional_values
                .push(value_definition(name, field_type, false, aggregators));
        }
        self
    }

    /// Finish the definition
    pub fn build(self) -> SchemaDefinition {
        SchemaDefinition {
            keys: self.keys,
            values: self.values,
            time_field: self.time_field,
            dimensions: self.dimensions,
        }
    }
}

fn value_definition(
    name: &str,
    field_type: FieldType,
    nullable: bool,
    aggregators: &[&str],
) -> ValueDefinition {
    ValueDefinition {
        name: name.to_string(),
        field_type,
        nullable,
        aggregators: aggregators.iter().map(|a| a.to_string()).collect(),
    }
}

// ============================================================================
// Resolved descriptor set
// ============================================================================

/// An aggregator bound to the value fields it consumes for one combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorBinding {
    aggregator_id: AggregatorId,
    name: String,
    kind: AggregatorKind,
    value_descriptor: FieldDescriptor,
}

impl AggregatorBinding {
    /// Registry id of the aggregator
    pub fn aggregator_id(&self) -> AggregatorId {
        self.aggregator_id
    }

    /// Canonical aggregator name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge operation
    pub fn kind(&self) -> AggregatorKind {
        self.kind
    }

    /// Value fields consumed by this aggregator, in declaration order
    pub fn value_descriptor(&self) -> &FieldDescriptor {
        &self.value_descriptor
    }
}

/// A resolved group-by projection with its aggregator bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionCombination {
    id: CombinationId,
    bucket: Option<TimeBucket>,
    time_field: Option<String>,
    key_descriptor: FieldDescriptor,
    bindings: Vec<AggregatorBinding>,
}

impl DimensionCombination {
    /// Dense id (declaration order)
    pub fn id(&self) -> CombinationId {
        self.id
    }

    /// Time bucketing, if any
    pub fn bucket(&self) -> Option<TimeBucket> {
        self.bucket
    }

    /// Name of the bucketed time field, set only when `bucket` is set
    pub fn time_field(&self) -> Option<&str> {
        self.time_field.as_deref()
    }

    /// Key projection; a bucketed combination ends with the time field
    pub fn key_descriptor(&self) -> &FieldDescriptor {
        &self.key_descriptor
    }

    /// Aggregators in configured order
    pub fn bindings(&self) -> &[AggregatorBinding] {
        &self.bindings
    }

    /// Binding for an aggregator id
    pub fn binding(&self, aggregator_id: AggregatorId) -> Option<&AggregatorBinding> {
        self.bindings
            .iter()
            .find(|b| b.aggregator_id == aggregator_id)
    }
}

/// Immutable descriptor set resolved from a [`SchemaDefinition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionalSchema {
    combinations: Vec<DimensionCombination>,
}

impl DimensionalSchema {
    /// Resolve and validate a definition against an aggregator registry
    pub fn build(
        definition: &SchemaDefinition,
        registry: &AggregatorRegistry,
    ) -> Result<Self, ConfigurationError> {
        if definition.dimensions.is_empty() {
            return Err(ConfigurationError::EmptySchema);
        }

        let keys = FieldDescriptor::new(definition.keys.clone());
        ensure_unique(definition.keys.iter().map(|k| k.name.as_str()))?;
        ensure_unique(definition.values.iter().map(|v| v.name.as_str()))?;

        if let Some(time_field) = &definition.time_field {
            let is_value = definition
                .values
                .iter()
                .chain(definition.dimensions.iter().flat_map(|d| &d.additional_values))
                .any(|v| &v.name == time_field);
            if keys.get(time_field).is_some() || is_value {
                return Err(ConfigurationError::DuplicateField(time_field.clone()));
            }
        }

        let mut combinations = Vec::with_capacity(definition.dimensions.len());
        for (id, dimension) in definition.dimensions.iter().enumerate() {
            let key_descriptor =
                resolve_key_descriptor(id, dimension, &keys, definition.time_field.as_deref())?;

            for extra in &dimension.additional_values {
                if definition.values.iter().any(|v| v.name == extra.name) {
                    return Err(ConfigurationError::DuplicateField(extra.name.clone()));
                }
            }
            ensure_unique(dimension.additional_values.iter().map(|v| v.name.as_str()))?;

            let values = definition
                .values
                .iter()
                .chain(dimension.additional_values.iter());
            let bindings = resolve_bindings(values, registry)?;
            if bindings.is_empty() {
                return Err(ConfigurationError::NoAggregators { combination: id });
            }

            combinations.push(DimensionCombination {
                id,
                bucket: dimension.bucket,
                time_field: dimension
                    .bucket
                    .and(definition.time_field.clone()),
                key_descriptor,
                bindings,
            });
        }

        Ok(Self { combinations })
    }

    /// Combinations in declaration order
    pub fn combinations(&self) -> &[DimensionCombination] {
        &self.combinations
    }

    /// Combination by id
    pub fn combination(&self, id: CombinationId) -> Option<&DimensionCombination> {
        self.combinations.get(id)
    }

    /// Total number of (combination, aggregator) pairs
    pub fn pair_count(&self) -> usize {
        self.combinations.iter().map(|c| c.bindings.len()).sum()
    }

    /// All (combination, binding) pairs in fan-out order
    pub fn pairs(&self) -> impl Iterator<Item = (&DimensionCombination, &AggregatorBinding)> {
        self.combinations
            .iter()
            .flat_map(|c| c.bindings.iter().map(move |b| (c, b)))
    }
}

fn ensure_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigurationError::DuplicateField(name.to_string()));
        }
    }
    Ok(())
}

fn resolve_key_descriptor(
    id: CombinationId,
    dimension: &DimensionDefinition,
    keys: &FieldDescriptor,
    time_field: Option<&str>,
) -> Result<FieldDescriptor, ConfigurationError> {
    ensure_unique(dimension.combination.iter().map(String::as_str))?;

    let mut specs = Vec::with_capacity(dimension.combination.len() + 1);
    for name in &dimension.combination {
        let spec = keys
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownKeyField {
                combination: id,
                field: name.clone(),
            })?;
        specs.push(spec.clone());
    }

    if dimension.bucket.is_some() {
        let time_field =
            time_field.ok_or(ConfigurationError::MissingTimeField { combination: id })?;
        specs.push(FieldSpec::required(time_field, FieldType::Integer));
    }

    if specs.is_empty() {
        return Err(ConfigurationError::EmptyKeyDescriptor { combination: id });
    }
    Ok(FieldDescriptor::new(specs))
}

fn resolve_bindings<'a>(
    values: impl Iterator<Item = &'a ValueDefinition>,
    registry: &AggregatorRegistry,
) -> Result<Vec<AggregatorBinding>, ConfigurationError> {
    // (binding, value specs) in first-appearance order of the aggregator
    let mut pending: Vec<(AggregatorId, AggregatorKind, Vec<FieldSpec>)> = Vec::new();

    for value in values {
        let mut applied = HashSet::new();
        for aggregator in &value.aggregators {
            let (id, kind) =
                registry
                    .resolve(aggregator)
                    .ok_or_else(|| ConfigurationError::UnknownAggregator {
                        field: value.name.clone(),
                        aggregator: aggregator.clone(),
                    })?;
            if !kind.accepts(value.field_type) {
                return Err(ConfigurationError::TypeMismatch {
                    aggregator: aggregator.clone(),
                    field: value.name.clone(),
                    field_type: value.field_type,
                });
            }
            if !applied.insert(id) {
                continue;
            }
            match pending.iter_mut().find(|(existing, _, _)| *existing == id) {
                Some((_, _, specs)) => specs.push(value.spec()),
                None => pending.push((id, kind, vec![value.spec()])),
            }
        }
    }

    Ok(pending
        .into_iter()
        .map(|(aggregator_id, kind, specs)| AggregatorBinding {
            aggregator_id,
            name: registry
                .name(aggregator_id)
                .unwrap_or(kind.name())
                .to_string(),
            kind,
            value_descriptor: FieldDescriptor::new(specs),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AggregatorRegistry {
        AggregatorRegistry::default()
    }

    fn sales() -> SchemaDefinitionBuilder {
        SchemaDefinition::builder()
            .key("city", FieldType::String)
            .key("product", FieldType::String)
            .value("amount", FieldType::Float, &["sum", "count", "avg"])
            .value("units", FieldType::Integer, &["sum", "max"])
    }

    #[test]
    fn test_bindings_follow_first_appearance() {
        let def = sales().dimension(&["city"]).build();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        let combination = &schema.combinations()[0];

        let names: Vec<_> = combination.bindings().iter().map(|b| b.name()).collect();
        assert_eq!(names, vec!["sum", "count", "avg", "max"]);

        let sum = combination.binding(0).unwrap();
        assert_eq!(
            sum.value_descriptor().names().collect::<Vec<_>>(),
            vec!["amount", "units"]
        );
        let max = combination.binding(3).unwrap();
        assert_eq!(max.value_descriptor().names().collect::<Vec<_>>(), vec!["units"]);
    }

    #[test]
    fn test_bucketed_combination_appends_time_field() {
        let def = sales()
            .time_field("ts")
            .bucketed_dimension(&["city"], TimeBucket::Hour)
            .build();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        let combination = &schema.combinations()[0];
        assert_eq!(
            combination.key_descriptor().names().collect::<Vec<_>>(),
            vec!["city", "ts"]
        );
        assert_eq!(combination.time_field(), Some("ts"));
        assert_eq!(combination.bucket(), Some(TimeBucket::Hour));
    }

    #[test]
    fn test_time_only_combination_is_allowed() {
        let def = sales()
            .time_field("ts")
            .bucketed_dimension(&[], TimeBucket::Minute)
            .build();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        assert_eq!(schema.combinations()[0].key_descriptor().len(), 1);
    }

    #[test]
    fn test_additional_values_only_extend_their_combination() {
        let def = sales()
            .dimension(&["city"])
            .dimension(&["product"])
            .additional_value("discount", FieldType::Float, &["min"])
            .build();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        assert_eq!(schema.combinations()[0].bindings().len(), 4);
        assert_eq!(schema.combinations()[1].bindings().len(), 5);
        assert_eq!(schema.pair_count(), 9);
        assert_eq!(schema.pairs().count(), 9);
    }

    #[test]
    fn test_configuration_errors() {
        let reg = registry();

        let def = sales().build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::EmptySchema)
        );

        let def = sales().dimension(&[]).build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::EmptyKeyDescriptor { combination: 0 })
        );

        let def = sales().dimension(&["country"]).build();
        assert!(matches!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::UnknownKeyField { combination: 0, .. })
        ));

        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .value("amount", FieldType::Float, &["median"])
            .dimension(&["city"])
            .build();
        assert!(matches!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::UnknownAggregator { .. })
        ));

        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .value("label", FieldType::String, &["sum"])
            .dimension(&["city"])
            .build();
        assert!(matches!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::TypeMismatch { .. })
        ));

        let def = sales()
            .bucketed_dimension(&["city"], TimeBucket::Day)
            .build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::MissingTimeField { combination: 0 })
        );

        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .dimension(&["city"])
            .build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::NoAggregators { combination: 0 })
        );

        let def = sales().key("city", FieldType::String).dimension(&["city"]).build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::DuplicateField("city".to_string()))
        );

        let def = sales().time_field("units").dimension(&["city"]).build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::DuplicateField("units".to_string()))
        );

        let def = sales()
            .time_field("ts")
            .dimension(&["city"])
            .additional_value("ts", FieldType::Integer, &["max"])
            .build();
        assert_eq!(
            DimensionalSchema::build(&def, &reg),
            Err(ConfigurationError::DuplicateField("ts".to_string()))
        );
    }

    #[test]
    fn test_count_accepts_strings() {
        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .value("user", FieldType::String, &["count", "COUNT"])
            .dimension(&["city"])
            .build();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        assert_eq!(schema.pair_count(), 1);
    }

    #[test]
    fn test_definition_from_toml() {
        let def: SchemaDefinition = toml::from_str(
            r#"
            time_field = "ts"

            [[keys]]
            name = "city"
            type = "string"

            [[values]]
            name = "amount"
            type = "float"
            aggregators = ["sum", "avg"]

            [[dimensions]]
            combination = ["city"]

            [[dimensions]]
            combination = ["city"]
            bucket = "day"
            "#,
        )
        .unwrap();
        let schema = DimensionalSchema::build(&def, &registry()).unwrap();
        assert_eq!(schema.pair_count(), 4);
        assert_eq!(schema.combinations()[1].bucket(), Some(TimeBucket::Day));
    }
}
