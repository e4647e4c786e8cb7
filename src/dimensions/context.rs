//! Conversion context handed to the event converter
//!
//! One context value lives on the dispatcher's stack for the duration of a
//! single event. It is rebound to the next (combination, aggregator) pair
//! before every converter call, so nothing is allocated inside the fan-out
//! loop. Converters only ever see a shared borrow for the length of one call.

use super::schema::{AggregatorBinding, DimensionCombination};
use crate::types::{AggregatorId, CombinationId, FieldDescriptor, SchemaId, TimeBucket};

/// The (schema, combination, aggregator) binding currently being converted
#[derive(Debug, Clone, Copy)]
pub struct ConversionContext<'a> {
    schema_id: SchemaId,
    combination: &'a DimensionCombination,
    binding: &'a AggregatorBinding,
}

impl<'a> ConversionContext<'a> {
    /// Create a context bound to its first pair
    pub fn new(
        schema_id: SchemaId,
        combination: &'a DimensionCombination,
        binding: &'a AggregatorBinding,
    ) -> Self {
        Self {
            schema_id,
            combination,
            binding,
        }
    }

    /// Rebind to another (combination, aggregator) pair
    #[inline]
    pub fn bind(&mut self, combination: &'a DimensionCombination, binding: &'a AggregatorBinding) {
        self.combination = combination;
        self.binding = binding;
    }

    /// Schema id stamped on produced aggregates
    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Active combination id
    pub fn combination_id(&self) -> CombinationId {
        self.combination.id()
    }

    /// Active aggregator id
    pub fn aggregator_id(&self) -> AggregatorId {
        self.binding.aggregator_id()
    }

    /// Active combination
    pub fn combination(&self) -> &'a DimensionCombination {
        self.combination
    }

    /// Active aggregator binding
    pub fn binding(&self) -> &'a AggregatorBinding {
        self.binding
    }

    /// Key projection of the active combination
    pub fn key_descriptor(&self) -> &'a FieldDescriptor {
        self.combination.key_descriptor()
    }

    /// Value projection of the active aggregator
    pub fn value_descriptor(&self) -> &'a FieldDescriptor {
        self.binding.value_descriptor()
    }

    /// Bucket applied to `field`, if it is the combination's time field
    pub fn bucket_for(&self, field: &str) -> Option<TimeBucket> {
        match (self.combination.bucket(), self.combination.time_field()) {
            (Some(bucket), Some(time_field)) if time_field == field => Some(bucket),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{AggregatorRegistry, DimensionalSchema, SchemaDefinition};
    use crate::types::FieldType;

    #[test]
    fn test_rebinding_tracks_active_pair() {
        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .value("amount", FieldType::Float, &["sum", "max"])
            .time_field("ts")
            .dimension(&["city"])
            .bucketed_dimension(&["city"], TimeBucket::Day)
            .build();
        let schema = DimensionalSchema::build(&def, &AggregatorRegistry::default()).unwrap();

        let mut pairs = schema.pairs();
        let (c, b) = pairs.next().unwrap();
        let mut context = ConversionContext::new(7, c, b);
        assert_eq!(context.combination_id(), 0);
        assert_eq!(context.aggregator_id(), 0);
        assert_eq!(context.bucket_for("ts"), None);

        let seen: Vec<_> = pairs
            .map(|(c, b)| {
                context.bind(c, b);
                (context.combination_id(), context.aggregator_id())
            })
            .collect();
        assert_eq!(seen, vec![(0, 3), (1, 0), (1, 3)]);
        assert_eq!(context.schema_id(), 7);
        assert_eq!(context.bucket_for("ts"), Some(TimeBucket::Day));
        assert_eq!(context.key_descriptor().len(), 2);
        assert_eq!(context.value_descriptor().len(), 1);
    }
}
