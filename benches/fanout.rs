//! Fan-out Benchmarks
//!
//! Measures per-event dispatch cost across dimension combinations and the
//! cost of flushing a populated window.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dimensions_compute::dimensions::{
    AggregateRecord, AggregatorRegistry, DimensionalSchema, DimensionsComputation, Record,
    RecordConverter, SchemaDefinition,
};
use dimensions_compute::types::{FieldType, FieldValue};
use std::hint::black_box;

// =============================================================================
// Test Data Generators
// =============================================================================

/// Schema over keys a, b, c with sum/count/avg on one value
fn create_schema(combinations: usize) -> DimensionalSchema {
    let all: [&[&str]; 7] = [
        &["a"],
        &["b"],
        &["c"],
        &["a", "b"],
        &["a", "c"],
        &["b", "c"],
        &["a", "b", "c"],
    ];
    let mut builder = SchemaDefinition::builder()
        .key("a", FieldType::String)
        .key("b", FieldType::String)
        .key("c", FieldType::Integer)
        .value("x", FieldType::Float, &["sum", "count", "avg"]);
    for keys in all.iter().take(combinations) {
        builder = builder.dimension(keys);
    }
    DimensionalSchema::build(&builder.build(), &AggregatorRegistry::default()).unwrap()
}

/// Events with a bounded key space (cardinality per key field)
fn create_events(count: usize, cardinality: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            let mut record = Record::new();
            record.insert("a".to_string(), format!("a{}", i % cardinality).into());
            record.insert("b".to_string(), format!("b{}", (i / 3) % cardinality).into());
            record.insert("c".to_string(), FieldValue::Integer((i % cardinality) as i64));
            record.insert("x".to_string(), FieldValue::Float(i as f64 * 0.5));
            record
        })
        .collect()
}

fn create_computation(combinations: usize) -> DimensionsComputation<RecordConverter> {
    DimensionsComputation::builder(create_schema(combinations), RecordConverter)
        .with_sink(Vec::<AggregateRecord>::new())
        .metrics_enabled(false)
        .build()
        .unwrap()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_process_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_event");
    let events = create_events(10_000, 64);

    for combinations in [1, 3, 7] {
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(combinations),
            &combinations,
            |b, &combinations| {
                b.iter_batched(
                    || create_computation(combinations),
                    |mut computation| {
                        for event in &events {
                            black_box(computation.process_event(event).unwrap());
                        }
                        computation
                    },
                    criterion::BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();
}

fn bench_window_close(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_close");

    for cardinality in [16, 256, 4096] {
        let events = create_events(cardinality * 4, cardinality);
        group.bench_with_input(
            BenchmarkId::from_parameter(cardinality),
            &events,
            |b, events| {
                b.iter_batched(
                    || {
                        let mut computation = create_computation(7);
                        for event in events {
                            computation.process_event(event).unwrap();
                        }
                        computation
                    },
                    |mut computation| black_box(computation.on_window_close().unwrap()),
                    criterion::BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_process_event, bench_window_close);
criterion_main!(benches);
