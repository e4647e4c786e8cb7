//! Finished aggregate records and their downstream sinks

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AggregatorId, CombinationId, FieldValue, KeyTuple, SchemaId};

/// How converted events reach the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitMode {
    /// Merge into slots and emit on window close
    #[default]
    Accumulate,
    /// Emit one single-event aggregate per converted event, immediately
    PassThrough,
}

impl EmitMode {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitMode::Accumulate => "accumulate",
            EmitMode::PassThrough => "pass_through",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "accumulate" => Some(EmitMode::Accumulate),
            "pass_through" | "passthrough" => Some(EmitMode::PassThrough),
            _ => None,
        }
    }
}

/// A finished aggregate emitted downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// Schema id of the producing engine
    pub schema_id: SchemaId,
    /// Window the aggregate was accumulated in
    pub window_id: u64,
    /// Dimension combination id
    pub combination_id: CombinationId,
    /// Aggregator id
    pub aggregator_id: AggregatorId,
    /// Aggregator name
    pub aggregator: String,
    /// Key tuple, ordered as the combination's key descriptor
    pub key: KeyTuple,
    /// Finalized values, ordered as the aggregator's value descriptor
    pub value: Vec<FieldValue>,
    /// Number of events merged into the aggregate
    pub event_count: u64,
}

/// Downstream consumer of finished aggregates
pub trait AggregateSink: Send {
    /// Accept one record
    fn emit(&mut self, record: AggregateRecord) -> Result<()>;

    /// Called after a window's records have all been emitted
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl AggregateSink for Vec<AggregateRecord> {
    fn emit(&mut self, record: AggregateRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Sink that keeps records in memory behind a shared handle
///
/// Clones share the same buffer, so a caller can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<AggregateRecord>>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record collected so far
    pub fn records(&self) -> Vec<AggregateRecord> {
        self.records.lock().clone()
    }

    /// Take every record collected so far
    pub fn drain(&self) -> Vec<AggregateRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Number of collected records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing has been collected
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AggregateSink for CollectingSink {
    fn emit(&mut self, record: AggregateRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Sink writing one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AggregateSink for JsonLinesSink<W> {
    fn emit(&mut self, record: AggregateRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
