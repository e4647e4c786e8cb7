//! Fan-out dispatcher
//!
//! [`DimensionsComputation`] is the single-schema dimensions operator. For
//! every raw event it walks each dimension combination in schema order and,
//! within it, each bound aggregator in configured order. Each pair is
//! converted with the same stack-held [`ConversionContext`] and merged into
//! its slot before the next pair is touched.
//!
//! The operator is single-threaded by contract: `process_event` and the
//! window signals take `&mut self`, so they can never overlap.
//!
//! # Example
//!
//! ```rust
//! use dimensions_compute::dimensions::{
//!     AggregatorRegistry, CollectingSink, DimensionalSchema, DimensionsComputation,
//!     Record, RecordConverter, SchemaDefinition,
//! };
//! use dimensions_compute::types::{FieldType, FieldValue};
//!
//! let definition = SchemaDefinition::builder()
//!     .key("city", FieldType::String)
//!     .value("amount", FieldType::Float, &["sum", "count"])
//!     .dimension(&["city"])
//!     .build();
//! let schema = DimensionalSchema::build(&definition, &AggregatorRegistry::default()).unwrap();
//!
//! let sink = CollectingSink::new();
//! let mut computation = DimensionsComputation::builder(schema, RecordConverter)
//!     .with_sink(sink.clone())
//!     .build()
//!     .unwrap();
//!
//! let mut event = Record::new();
//! event.insert("city".to_string(), "NYC".into());
//! event.insert("amount".to_string(), FieldValue::Float(2.0));
//! computation.process_event(&event).unwrap();
//!
//! assert_eq!(computation.on_window_close().unwrap(), 2);
//! assert_eq!(sink.len(), 2);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::aggregator::AggregatorRegistry;
use super::context::ConversionContext;
use super::converter::{validate_event, EventConverter};
use super::schema::DimensionalSchema;
use super::sink::{AggregateRecord, AggregateSink, EmitMode};
use super::slots::AggregateSlotTable;
use super::window::{WindowController, WindowState};
use crate::config::Config;
use crate::error::{ConfigurationError, Error, Result};
use crate::metrics;
use crate::types::SchemaId;

/// Schema id used when none is configured
pub const DEFAULT_SCHEMA_ID: SchemaId = 1;

/// Initial per-slot key capacity used when none is configured
pub const DEFAULT_SLOT_CAPACITY: usize = 1024;

// ============================================================================
// Failure Policy
// ============================================================================

/// What a conversion failure does to the rest of an event's fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the failing pair and continue with the remaining pairs
    #[default]
    SkipPair,
    /// Stop the fan-out and return the error; earlier pairs stay merged
    FailEvent,
}

impl FailurePolicy {
    /// Label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::SkipPair => "skip_pair",
            FailurePolicy::FailEvent => "fail_event",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "skip_pair" | "skip" => Some(FailurePolicy::SkipPair),
            "fail_event" | "fail" => Some(FailurePolicy::FailEvent),
            _ => None,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Outcome of one `process_event` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
    /// Pairs merged into a slot (or emitted in pass-through mode)
    pub merged: usize,
    /// Pairs skipped after a conversion failure
    pub skipped: usize,
}

/// Running counters for the operator
#[derive(Debug, Default)]
pub struct ComputationStats {
    /// Raw events processed
    pub events_processed: AtomicU64,
    /// Pairs merged or passed through
    pub pairs_merged: AtomicU64,
    /// Pairs skipped after conversion failures
    pub pairs_skipped: AtomicU64,
    /// Events rejected under the fail-event policy
    pub events_failed: AtomicU64,
    /// Records handed to the sink
    pub records_emitted: AtomicU64,
    /// Completed window flushes
    pub windows_flushed: AtomicU64,
}

impl ComputationStats {
    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> ComputationStatsSnapshot {
        ComputationStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            pairs_merged: self.pairs_merged.load(Ordering::Relaxed),
            pairs_skipped: self.pairs_skipped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of operator statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputationStatsSnapshot {
    /// Raw events processed
    pub events_processed: u64,
    /// Pairs merged or passed through
    pub pairs_merged: u64,
    /// Pairs skipped after conversion failures
    pub pairs_skipped: u64,
    /// Events rejected under the fail-event policy
    pub events_failed: u64,
    /// Records handed to the sink
    pub records_emitted: u64,
    /// Completed window flushes
    pub windows_flushed: u64,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`DimensionsComputation`]
pub struct DimensionsComputationBuilder<C: EventConverter> {
    schema: Arc<DimensionalSchema>,
    converter: C,
    sink: Option<Box<dyn AggregateSink>>,
    schema_id: SchemaId,
    emit_mode: EmitMode,
    failure_policy: FailurePolicy,
    slot_capacity: usize,
    metrics_enabled: bool,
}

impl<C: EventConverter> DimensionsComputationBuilder<C> {
    /// Start from a resolved schema and a converter
    pub fn new(schema: impl Into<Arc<DimensionalSchema>>, converter: C) -> Self {
        Self {
            schema: schema.into(),
            converter,
            sink: None,
            schema_id: DEFAULT_SCHEMA_ID,
            emit_mode: EmitMode::default(),
            failure_policy: FailurePolicy::default(),
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            metrics_enabled: false,
        }
    }

    /// Set the output sink
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: AggregateSink + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the output sink from a box
    pub fn with_boxed_sink(mut self, sink: Box<dyn AggregateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Schema id stamped on emitted records
    pub fn schema_id(mut self, schema_id: SchemaId) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Accumulate or pass through
    pub fn emit_mode(mut self, emit_mode: EmitMode) -> Self {
        self.emit_mode = emit_mode;
        self
    }

    /// Conversion failure handling
    pub fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Initial key capacity of every slot
    pub fn slot_capacity(mut self, slot_capacity: usize) -> Self {
        self.slot_capacity = slot_capacity;
        self
    }

    /// Record Prometheus metrics
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Build the operator; fails if no sink was configured
    pub fn build(self) -> Result<DimensionsComputation<C>> {
        let sink = self
            .sink
            .ok_or_else(|| ConfigurationError::Invalid("No aggregate sink configured".to_string()))?;

        let slots = AggregateSlotTable::new(&self.schema, self.slot_capacity);
        info!(
            schema_id = self.schema_id,
            combinations = self.schema.combinations().len(),
            slots = slots.index().len(),
            emit_mode = self.emit_mode.as_str(),
            failure_policy = self.failure_policy.as_str(),
            "Dimensions computation initialized"
        );

        Ok(DimensionsComputation {
            schema_id: self.schema_id,
            schema: self.schema,
            converter: self.converter,
            slots,
            sink,
            emit_mode: self.emit_mode,
            failure_policy: self.failure_policy,
            window: WindowController::new(),
            metrics_enabled: self.metrics_enabled,
            stats: ComputationStats::default(),
        })
    }
}

// ============================================================================
// Dimensions Computation
// ============================================================================

/// Single-schema dimensions operator
pub struct DimensionsComputation<C: EventConverter> {
    schema_id: SchemaId,
    schema: Arc<DimensionalSchema>,
    converter: C,
    slots: AggregateSlotTable,
    sink: Box<dyn AggregateSink>,
    emit_mode: EmitMode,
    failure_policy: FailurePolicy,
    window: WindowController,
    metrics_enabled: bool,
    stats: ComputationStats,
}

impl<C: EventConverter> DimensionsComputation<C> {
    /// Start building an operator
    pub fn builder(
        schema: impl Into<Arc<DimensionalSchema>>,
        converter: C,
    ) -> DimensionsComputationBuilder<C> {
        DimensionsComputationBuilder::new(schema, converter)
    }

    /// Build an operator from configuration
    ///
    /// The configuration must carry a schema definition; it is resolved
    /// against `registry`.
    pub fn from_config<S>(
        config: &Config,
        registry: &AggregatorRegistry,
        converter: C,
        sink: S,
    ) -> Result<Self>
    where
        S: AggregateSink + 'static,
    {
        config.validate()?;
        let definition = config.schema.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid("Configuration has no schema definition".to_string())
        })?;
        let schema = DimensionalSchema::build(definition, registry)?;

        DimensionsComputationBuilder::new(schema, converter)
            .with_sink(sink)
            .schema_id(config.engine.schema_id)
            .emit_mode(config.engine.emit_mode)
            .failure_policy(config.engine.failure_policy)
            .slot_capacity(config.engine.slot_capacity)
            .metrics_enabled(config.monitoring.metrics_enabled)
            .build()
    }

    /// Fan one raw event out across every (combination, aggregator) pair
    pub fn process_event(&mut self, input: &C::Input) -> Result<FanOutReport> {
        self.window.ensure_open("process event")?;

        let Self {
            schema_id,
            schema,
            converter,
            slots,
            sink,
            emit_mode,
            failure_policy,
            window,
            metrics_enabled,
            stats,
        } = self;

        let mut report = FanOutReport::default();
        let Some((first_combination, first_binding)) = schema.pairs().next() else {
            return Ok(report);
        };
        let mut context = ConversionContext::new(*schema_id, first_combination, first_binding);

        for (combination, binding) in schema.pairs() {
            context.bind(combination, binding);

            let converted = converter.convert(input, &context).and_then(|event| {
                validate_event(&context, &event)?;
                Ok(event)
            });
            let event = match converted {
                Ok(event) => event,
                Err(err) => match failure_policy {
                    FailurePolicy::SkipPair => {
                        warn!(
                            combination = combination.id(),
                            aggregator = binding.name(),
                            error = %err,
                            "Skipping dimension pair after conversion failure"
                        );
                        report.skipped += 1;
                        stats.pairs_skipped.fetch_add(1, Ordering::Relaxed);
                        if *metrics_enabled {
                            let combination_label = combination.id().to_string();
                            metrics::PAIRS_SKIPPED_TOTAL
                                .with_label_values(&[combination_label.as_str(), binding.name()])
                                .inc();
                        }
                        continue;
                    }
                    FailurePolicy::FailEvent => {
                        debug!(
                            combination = combination.id(),
                            aggregator = binding.name(),
                            merged = report.merged,
                            error = %err,
                            "Rejecting event after conversion failure"
                        );
                        stats.events_failed.fetch_add(1, Ordering::Relaxed);
                        stats
                            .pairs_merged
                            .fetch_add(report.merged as u64, Ordering::Relaxed);
                        if *metrics_enabled {
                            metrics::EVENTS_FAILED_TOTAL.inc();
                        }
                        return Err(err.into());
                    }
                },
            };

            let missing_slot = || {
                ConfigurationError::Invalid(format!(
                    "No slot for combination {} aggregator {}",
                    combination.id(),
                    binding.name()
                ))
            };
            let slot = slots
                .index()
                .get(combination.id(), binding.aggregator_id())
                .ok_or_else(missing_slot)?;

            match emit_mode {
                EmitMode::Accumulate => {
                    let created = slots.merge(slot, event).ok_or_else(missing_slot)?;
                    if created && *metrics_enabled {
                        metrics::OPEN_AGGREGATES.inc();
                    }
                }
                EmitMode::PassThrough => {
                    let target = slots.slot(slot).ok_or_else(missing_slot)?;
                    let (key, value, event_count) = target.single(event).into_parts();
                    let emitted = sink.emit(AggregateRecord {
                        schema_id: *schema_id,
                        window_id: window.window_id(),
                        combination_id: combination.id(),
                        aggregator_id: binding.aggregator_id(),
                        aggregator: binding.name().to_string(),
                        key,
                        value,
                        event_count,
                    });
                    if let Err(err) = emitted {
                        warn!(
                            combination = combination.id(),
                            aggregator = binding.name(),
                            merged = report.merged,
                            error = %err,
                            "Aggregate sink failed during pass-through"
                        );
                        stats.events_failed.fetch_add(1, Ordering::Relaxed);
                        stats
                            .pairs_merged
                            .fetch_add(report.merged as u64, Ordering::Relaxed);
                        if *metrics_enabled {
                            metrics::EVENTS_FAILED_TOTAL.inc();
                        }
                        return Err(err);
                    }
                    stats.records_emitted.fetch_add(1, Ordering::Relaxed);
                    if *metrics_enabled {
                        metrics::AGGREGATES_EMITTED_TOTAL
                            .with_label_values(&[EmitMode::PassThrough.as_str()])
                            .inc();
                    }
                }
            }
            report.merged += 1;
        }

        stats.events_processed.fetch_add(1, Ordering::Relaxed);
        stats
            .pairs_merged
            .fetch_add(report.merged as u64, Ordering::Relaxed);
        if *metrics_enabled {
            metrics::EVENTS_TOTAL.inc();
            metrics::MERGES_TOTAL.inc_by(report.merged as u64);
        }
        Ok(report)
    }

    /// Window-open signal; returns the new window id
    pub fn on_window_open(&mut self) -> Result<u64> {
        let window_id = self.window.open()?;
        debug!(window_id, "Window opened");
        Ok(window_id)
    }

    /// Window-close signal: emit and remove every aggregate
    ///
    /// Every slot is drained even if the sink fails; the first sink error is
    /// returned after the controller is back in `Open`.
    pub fn on_window_close(&mut self) -> Result<usize> {
        self.window.begin_flush()?;
        let started = Instant::now();

        let window_id = self.window.window_id();
        let mut emitted = 0usize;
        let mut drained = 0usize;
        let mut first_error: Option<Error> = None;

        for slot in self.slots.slots_mut() {
            let combination_id = slot.combination_id();
            let aggregator_id = slot.aggregator_id();
            let aggregator = slot.aggregator_name().to_string();

            for aggregate in slot.drain() {
                drained += 1;
                if first_error.is_some() {
                    continue;
                }
                let (key, value, event_count) = aggregate.into_parts();
                let record = AggregateRecord {
                    schema_id: self.schema_id,
                    window_id,
                    combination_id,
                    aggregator_id,
                    aggregator: aggregator.clone(),
                    key,
                    value,
                    event_count,
                };
                match self.sink.emit(record) {
                    Ok(()) => emitted += 1,
                    Err(e) => first_error = Some(e),
                }
            }
        }

        if first_error.is_none() {
            if let Err(e) = self.sink.flush() {
                first_error = Some(e);
            }
        }

        self.window.end_flush();
        self.stats
            .records_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        self.stats.windows_flushed.fetch_add(1, Ordering::Relaxed);
        if self.metrics_enabled {
            metrics::AGGREGATES_EMITTED_TOTAL
                .with_label_values(&[EmitMode::Accumulate.as_str()])
                .inc_by(emitted as u64);
            metrics::FLUSH_DURATION.observe(started.elapsed().as_secs_f64());
            metrics::OPEN_AGGREGATES.sub(drained as i64);
        }
        debug!(window_id, emitted, "Window flushed");

        match first_error {
            Some(e) => {
                warn!(window_id, error = %e, "Aggregate sink failed during flush");
                Err(e)
            }
            None => Ok(emitted),
        }
    }

    /// Move to the terminal `Closed` state, discarding open aggregates
    pub fn shutdown(&mut self) -> usize {
        if !self.window.close() {
            return 0;
        }
        let discarded = self.slots.clear();
        if self.metrics_enabled {
            metrics::OPEN_AGGREGATES.sub(discarded as i64);
        }
        if discarded > 0 {
            warn!(discarded, "Shutting down with unflushed aggregates");
        }
        info!(
            schema_id = self.schema_id,
            windows_flushed = self.window.windows_flushed(),
            "Dimensions computation shut down"
        );
        discarded
    }

    /// Window controller state
    pub fn window_state(&self) -> WindowState {
        self.window.state()
    }

    /// Id of the window currently accumulating
    pub fn window_id(&self) -> u64 {
        self.window.window_id()
    }

    /// Live aggregates across all slots
    pub fn open_aggregates(&self) -> usize {
        self.slots.open_aggregates()
    }

    /// Slot table
    pub fn slots(&self) -> &AggregateSlotTable {
        &self.slots
    }

    /// Resolved schema
    pub fn schema(&self) -> &DimensionalSchema {
        &self.schema
    }

    /// Schema id stamped on records
    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Emission strategy
    pub fn emit_mode(&self) -> EmitMode {
        self.emit_mode
    }

    /// Conversion failure policy
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Statistics snapshot
    pub fn stats(&self) -> ComputationStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<C: EventConverter> fmt::Debug for DimensionsComputation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionsComputation")
            .field("schema_id", &self.schema_id)
            .field("emit_mode", &self.emit_mode)
            .field("failure_policy", &self.failure_policy)
            .field("window", &self.window)
            .field("open_aggregates", &self.slots.open_aggregates())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{CollectingSink, Record, RecordConverter, SchemaDefinition};
    use crate::types::{FieldType, FieldValue};

    fn schema() -> DimensionalSchema {
        let def = SchemaDefinition::builder()
            .key("city", FieldType::String)
            .key("zone", FieldType::String)
            .value("amount", FieldType::Float, &["sum", "count"])
            .dimension(&["city"])
            .dimension(&["zone"])
            .build();
        DimensionalSchema::build(&def, &AggregatorRegistry::default()).unwrap()
    }

    fn record(fields: &[(&str, FieldValue)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_build_requires_sink() {
        let err = DimensionsComputation::builder(schema(), RecordConverter)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_skip_pair_reports_counts() {
        let sink = CollectingSink::new();
        let mut computation = DimensionsComputation::builder(schema(), RecordConverter)
            .with_sink(sink.clone())
            .build()
            .unwrap();

        let report = computation
            .process_event(&record(&[("city", "NYC".into()), ("amount", 1.0.into())]))
            .unwrap();
        assert_eq!(report, FanOutReport { merged: 2, skipped: 2 });

        let stats = computation.stats();
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.pairs_merged, 2);
        assert_eq!(stats.pairs_skipped, 2);
    }

    #[test]
    fn test_fail_event_stops_fan_out() {
        let mut computation = DimensionsComputation::builder(schema(), RecordConverter)
            .with_sink(Vec::<AggregateRecord>::new())
            .failure_policy(FailurePolicy::FailEvent)
            .build()
            .unwrap();

        let err = computation
            .process_event(&record(&[("city", "NYC".into()), ("amount", 1.0.into())]))
            .unwrap_err();
        assert!(matches!(err, Error::FieldResolution(_)));
        assert_eq!(computation.open_aggregates(), 2);
        assert_eq!(computation.stats().events_failed, 1);
        assert_eq!(computation.stats().events_processed, 0);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let mut computation = DimensionsComputation::builder(schema(), RecordConverter)
            .with_sink(Vec::<AggregateRecord>::new())
            .build()
            .unwrap();
        computation
            .process_event(&record(&[
                ("city", "NYC".into()),
                ("zone", "east".into()),
                ("amount", 1.0.into()),
            ]))
            .unwrap();

        assert_eq!(computation.shutdown(), 4);
        assert_eq!(computation.shutdown(), 0);
        assert_eq!(computation.window_state(), WindowState::Closed);
        assert!(computation.process_event(&Record::new()).is_err());
        assert!(computation.on_window_open().is_err());
        assert!(computation.on_window_close().is_err());
    }

    /// Sink that accepts `capacity` records and then fails
    struct FailingSink {
        capacity: usize,
        accepted: usize,
    }

    impl AggregateSink for FailingSink {
        fn emit(&mut self, _record: AggregateRecord) -> Result<()> {
            if self.accepted == self.capacity {
                return Err(Error::Serialization("sink closed".to_string()));
            }
            self.accepted += 1;
            Ok(())
        }
    }

    #[test]
    fn test_pass_through_sink_error_updates_stats() {
        let mut computation = DimensionsComputation::builder(schema(), RecordConverter)
            .with_sink(FailingSink {
                capacity: 1,
                accepted: 0,
            })
            .emit_mode(EmitMode::PassThrough)
            .build()
            .unwrap();

        let err = computation
            .process_event(&record(&[
                ("city", "NYC".into()),
                ("zone", "east".into()),
                ("amount", 1.0.into()),
            ]))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));

        let stats = computation.stats();
        assert_eq!(stats.events_failed, 1);
        assert_eq!(stats.events_processed, 0);
        assert_eq!(stats.pairs_merged, 1);
        assert_eq!(stats.records_emitted, 1);
    }

    #[test]
    fn test_open_aggregates_gauge_tracks_each_instance() {
        let event = record(&[
            ("city", "NYC".into()),
            ("zone", "east".into()),
            ("amount", 1.0.into()),
        ]);
        let build = || {
            DimensionsComputation::builder(schema(), RecordConverter)
                .with_sink(Vec::<AggregateRecord>::new())
                .metrics_enabled(true)
                .build()
                .unwrap()
        };
        let mut first = build();
        let mut second = build();
        let base = metrics::OPEN_AGGREGATES.get();

        first.process_event(&event).unwrap();
        second.process_event(&event).unwrap();
        assert_eq!(metrics::OPEN_AGGREGATES.get(), base + 8);

        assert_eq!(first.on_window_close().unwrap(), 4);
        assert_eq!(metrics::OPEN_AGGREGATES.get(), base + 4);

        assert_eq!(second.shutdown(), 4);
        assert_eq!(metrics::OPEN_AGGREGATES.get(), base);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(FailurePolicy::parse("fail-event"), Some(FailurePolicy::FailEvent));
        assert_eq!(FailurePolicy::parse("SKIP_PAIR"), Some(FailurePolicy::SkipPair));
        assert_eq!(FailurePolicy::parse("retry"), None);
    }
}
