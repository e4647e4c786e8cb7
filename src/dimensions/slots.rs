//! Aggregate slot table
//!
//! One [`AggregateSlot`] exists per (combination, aggregator) pair. Slots are
//! stored in a dense array and addressed through a [`SlotIndex`] resolved once
//! at setup, so the per-pair lookup in the fan-out loop is a single hash probe
//! followed by an array access.
//!
//! ```text
//! (combination, aggregator) ──SlotIndex──► slot #
//!                                            │
//!  slots: [ {key → Aggregate}, {key → Aggregate}, ... ]
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::aggregator::{Accumulator, AggregatorKind};
use super::converter::CanonicalEvent;
use super::schema::DimensionalSchema;
use crate::types::{AggregatorId, CombinationId, FieldType, FieldValue, KeyTuple};

// ============================================================================
// Aggregate
// ============================================================================

/// Running aggregate for one key within one slot
///
/// The key never changes after creation; only the accumulators and the event
/// counter mutate.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    key: KeyTuple,
    accumulators: Vec<Accumulator>,
    event_count: u64,
}

impl Aggregate {
    /// Create an aggregate seeded with the aggregator's identity per value field
    pub fn new(key: KeyTuple, kind: AggregatorKind, value_types: &[FieldType]) -> Self {
        Self {
            key,
            accumulators: value_types.iter().map(|t| kind.identity(*t)).collect(),
            event_count: 0,
        }
    }

    /// Fold one event's value tuple in and count the event
    pub fn merge(&mut self, values: &[FieldValue]) {
        for (acc, value) in self.accumulators.iter_mut().zip(values) {
            acc.update(value);
        }
        self.event_count += 1;
    }

    /// Merge another aggregate's state into this one
    pub fn combine(&mut self, other: &Aggregate) {
        for (acc, theirs) in self.accumulators.iter_mut().zip(&other.accumulators) {
            acc.combine(theirs);
        }
        self.event_count += other.event_count;
    }

    /// Key tuple
    pub fn key(&self) -> &KeyTuple {
        &self.key
    }

    /// Number of events merged
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Accumulator state per value field
    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    /// Finalized value tuple
    pub fn finalize(&self) -> Vec<FieldValue> {
        self.accumulators.iter().map(Accumulator::finalize).collect()
    }

    /// Split into key and finalized values
    pub fn into_parts(self) -> (KeyTuple, Vec<FieldValue>, u64) {
        let values = self.finalize();
        (self.key, values, self.event_count)
    }
}

// ============================================================================
// Aggregate Slot
// ============================================================================

/// Per (combination, aggregator) mapping from key tuple to aggregate
#[derive(Debug, Clone)]
pub struct AggregateSlot {
    combination_id: CombinationId,
    aggregator_id: AggregatorId,
    aggregator_name: String,
    kind: AggregatorKind,
    value_types: Vec<FieldType>,
    aggregates: HashMap<KeyTuple, Aggregate>,
}

impl AggregateSlot {
    /// Create an empty slot
    pub fn new(
        combination_id: CombinationId,
        aggregator_id: AggregatorId,
        aggregator_name: impl Into<String>,
        kind: AggregatorKind,
        value_types: Vec<FieldType>,
        capacity: usize,
    ) -> Self {
        Self {
            combination_id,
            aggregator_id,
            aggregator_name: aggregator_name.into(),
            kind,
            value_types,
            aggregates: HashMap::with_capacity(capacity),
        }
    }

    /// Merge a canonical event, creating the aggregate for its key if absent
    ///
    /// Returns true when a new aggregate was created.
    pub fn merge(&mut self, event: CanonicalEvent) -> bool {
        let CanonicalEvent { key, values } = event;
        match self.aggregates.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&values);
                false
            }
            Entry::Vacant(entry) => {
                let mut aggregate =
                    Aggregate::new(entry.key().clone(), self.kind, &self.value_types);
                aggregate.merge(&values);
                entry.insert(aggregate);
                true
            }
        }
    }

    /// Fresh aggregate holding a single event, without touching the slot
    pub fn single(&self, event: CanonicalEvent) -> Aggregate {
        let mut aggregate = Aggregate::new(event.key, self.kind, &self.value_types);
        aggregate.merge(&event.values);
        aggregate
    }

    /// Aggregate for a key
    pub fn get(&self, key: &KeyTuple) -> Option<&Aggregate> {
        self.aggregates.get(key)
    }

    /// Remove every aggregate, leaving the slot empty
    pub fn drain(&mut self) -> impl Iterator<Item = Aggregate> + '_ {
        self.aggregates.drain().map(|(_, aggregate)| aggregate)
    }

    /// Iterate live aggregates
    pub fn iter(&self) -> impl Iterator<Item = &Aggregate> {
        self.aggregates.values()
    }

    /// Number of live aggregates
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    /// True when no aggregates are held
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Combination this slot belongs to
    pub fn combination_id(&self) -> CombinationId {
        self.combination_id
    }

    /// Aggregator this slot belongs to
    pub fn aggregator_id(&self) -> AggregatorId {
        self.aggregator_id
    }

    /// Aggregator name
    pub fn aggregator_name(&self) -> &str {
        &self.aggregator_name
    }

    /// Merge operation
    pub fn kind(&self) -> AggregatorKind {
        self.kind
    }
}

// ============================================================================
// Slot Index
// ============================================================================

/// Dense (combination, aggregator) → slot number mapping
///
/// Slot numbers follow fan-out order, so building twice from the same schema
/// yields the same mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotIndex {
    index: HashMap<(CombinationId, AggregatorId), usize>,
    pairs: Vec<(CombinationId, AggregatorId)>,
}

impl SlotIndex {
    /// Build from a schema
    pub fn build(schema: &DimensionalSchema) -> Self {
        let pairs: Vec<_> = schema
            .pairs()
            .map(|(c, b)| (c.id(), b.aggregator_id()))
            .collect();
        let index = pairs.iter().enumerate().map(|(i, pair)| (*pair, i)).collect();
        Self { index, pairs }
    }

    /// Slot number for a pair
    #[inline]
    pub fn get(&self, combination_id: CombinationId, aggregator_id: AggregatorId) -> Option<usize> {
        self.index.get(&(combination_id, aggregator_id)).copied()
    }

    /// Pair held in a slot
    pub fn pair(&self, slot: usize) -> Option<(CombinationId, AggregatorId)> {
        self.pairs.get(slot).copied()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the schema has no pairs
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ============================================================================
// Slot Table
// ============================================================================

/// Arena of aggregate slots addressed by a [`SlotIndex`]
#[derive(Debug, Clone)]
pub struct AggregateSlotTable {
    index: SlotIndex,
    slots: Vec<AggregateSlot>,
}

impl AggregateSlotTable {
    /// Create one empty slot per (combination, aggregator) pair
    pub fn new(schema: &DimensionalSchema, capacity: usize) -> Self {
        let index = SlotIndex::build(schema);
        let slots = schema
            .pairs()
            .map(|(combination, binding)| {
                AggregateSlot::new(
                    combination.id(),
                    binding.aggregator_id(),
                    binding.name(),
                    binding.kind(),
                    binding
                        .value_descriptor()
                        .fields()
                        .iter()
                        .map(|f| f.field_type)
                        .collect(),
                    capacity,
                )
            })
            .collect();
        Self { index, slots }
    }

    /// Slot index table
    pub fn index(&self) -> &SlotIndex {
        &self.index
    }

    /// Merge a canonical event into slot `slot`
    ///
    /// `None` for an unknown slot, otherwise whether a new key was created.
    pub fn merge(&mut self, slot: usize, event: CanonicalEvent) -> Option<bool> {
        self.slots.get_mut(slot).map(|target| target.merge(event))
    }

    /// Slot by number
    pub fn slot(&self, slot: usize) -> Option<&AggregateSlot> {
        self.slots.get(slot)
    }

    /// Slot for a (combination, aggregator) pair
    pub fn slot_for(
        &self,
        combination_id: CombinationId,
        aggregator_id: AggregatorId,
    ) -> Option<&AggregateSlot> {
        self.index
            .get(combination_id, aggregator_id)
            .and_then(|i| self.slots.get(i))
    }

    /// All slots in index order
    pub fn slots(&self) -> &[AggregateSlot] {
        &self.slots
    }

    /// Mutable slots in index order
    pub fn slots_mut(&mut self) -> &mut [AggregateSlot] {
        &mut self.slots
    }

    /// Live aggregates across all slots
    pub fn open_aggregates(&self) -> usize {
        self.slots.iter().map(AggregateSlot::len).sum()
    }

    /// True when every slot is empty
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(AggregateSlot::is_empty)
    }

    /// Drop every aggregate; returns how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.open_aggregates();
        for slot in &mut self.slots {
            slot.aggregates.clear();
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{AggregatorRegistry, SchemaDefinition};

    fn schema() -> DimensionalSchema {
        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .key("day", FieldType::Integer)
            .value("amount", FieldType::Float, &["sum", "count", "avg"])
            .dimension(&["city"])
            .dimension(&["city", "day"])
            .build();
        DimensionalSchema::build(&def, &AggregatorRegistry::default()).unwrap()
    }

    fn event(city: &str, amount: f64) -> CanonicalEvent {
        CanonicalEvent {
            key: vec![city.into()],
            values: vec![FieldValue::Float(amount)],
        }
    }

    #[test]
    fn test_slot_index_is_dense_and_ordered() {
        let index = SlotIndex::build(&schema());
        assert_eq!(index.len(), 6);
        assert_eq!(index.get(0, 0), Some(0));
        assert_eq!(index.get(0, 4), Some(2));
        assert_eq!(index.get(1, 1), Some(4));
        assert_eq!(index.get(1, 2), None);
        assert_eq!(index.pair(5), Some((1, 4)));
    }

    #[test]
    fn test_merge_creates_then_updates() {
        let mut table = AggregateSlotTable::new(&schema(), 16);
        assert_eq!(table.merge(0, event("NYC", 2.0)), Some(true));
        assert_eq!(table.merge(0, event("NYC", 3.0)), Some(false));
        assert_eq!(table.merge(0, event("SF", 1.0)), Some(true));
        assert_eq!(table.merge(99, event("SF", 1.0)), None);

        let slot = table.slot_for(0, 0).unwrap();
        assert_eq!(slot.len(), 2);
        let nyc = slot.get(&vec!["NYC".into()]).unwrap();
        assert_eq!(nyc.event_count(), 2);
        assert_eq!(nyc.finalize(), vec![FieldValue::Float(5.0)]);
        assert_eq!(table.open_aggregates(), 2);
    }

    #[test]
    fn test_drain_and_clear_empty_the_table() {
        let mut table = AggregateSlotTable::new(&schema(), 0);
        table.merge(1, event("NYC", 2.0));
        table.merge(2, event("NYC", 2.0));

        let drained: Vec<_> = table.slots_mut()[1].drain().collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].finalize(), vec![FieldValue::Integer(1)]);

        assert_eq!(table.clear(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_single_leaves_slot_untouched() {
        let table = AggregateSlotTable::new(&schema(), 0);
        let slot = table.slot(2).unwrap();
        let aggregate = slot.single(event("NYC", 4.0));
        assert_eq!(aggregate.event_count(), 1);
        assert_eq!(aggregate.finalize(), vec![FieldValue::Float(4.0)]);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_aggregate_combine() {
        let mut a = Aggregate::new(vec!["k".into()], AggregatorKind::Sum, &[FieldType::Integer]);
        a.merge(&[FieldValue::Integer(2)]);
        let mut b = a.clone();
        b.merge(&[FieldValue::Integer(5)]);
        a.combine(&b);
        assert_eq!(a.event_count(), 3);
        assert_eq!(a.finalize(), vec![FieldValue::Integer(9)]);
    }
}
