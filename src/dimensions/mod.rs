//! Multi-Dimensional Streaming Aggregation
//!
//! This module computes running aggregates for every configured dimension
//! combination of an event stream. One raw event fans out across all
//! combinations and, inside each, across all bound aggregators.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │            Raw event                │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │        Fan-out dispatcher           │
//! │  combinations × aggregators         │
//! │  (ConversionContext rebound/pair)   │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │         Event converter             │
//! │  raw → (key tuple, value tuple)     │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │       Aggregate slot table          │
//! │  one key→aggregate map per pair     │
//! └─────────────────────────────────────┘
//!                  ↓  window close
//! ┌─────────────────────────────────────┐
//! │      Aggregate records → sink       │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - **Schema**: [`SchemaDefinition`] resolved into an immutable [`DimensionalSchema`]
//! - **Aggregators**: [`AggregatorRegistry`] and the built-in [`AggregatorKind`]s
//! - **Conversion**: [`EventConverter`] driven through a reused [`ConversionContext`]
//! - **Slots**: [`AggregateSlotTable`] addressed through a dense [`SlotIndex`]
//! - **Windows**: [`WindowController`] (`Open → Flushing → Open`, `Closed`)
//! - **Operator**: [`DimensionsComputation`]

pub mod aggregator;
pub mod computation;
pub mod context;
pub mod converter;
pub mod schema;
pub mod sink;
pub mod slots;
pub mod window;

pub use aggregator::{Accumulator, AggregatorKind, AggregatorRegistry, Number};
pub use computation::{
    ComputationStats, ComputationStatsSnapshot, DimensionsComputation,
    DimensionsComputationBuilder, FailurePolicy, FanOutReport, DEFAULT_SCHEMA_ID,
    DEFAULT_SLOT_CAPACITY,
};
pub use context::ConversionContext;
pub use converter::{
    project, validate_event, CanonicalEvent, EventConverter, FnConverter, Record,
    RecordConverter,
};
pub use schema::{
    AggregatorBinding, DimensionCombination, DimensionDefinition, DimensionalSchema,
    SchemaDefinition, SchemaDefinitionBuilder, ValueDefinition,
};
pub use sink::{AggregateRecord, AggregateSink, CollectingSink, EmitMode, JsonLinesSink};
pub use slots::{Aggregate, AggregateSlot, AggregateSlotTable, SlotIndex};
pub use window::{WindowController, WindowState};
