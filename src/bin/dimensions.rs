//! Dimensions command-line runner
//!
//! Feeds newline-delimited JSON events through a dimensions computation and
//! prints every emitted aggregate as a JSON line.
//!
//! # CLI Commands
//!
//! - `check-config` - Validate a configuration file and its schema
//! - `run` - Aggregate events from a file or stdin
//!
//! # Example Usage
//!
//! ```bash
//! # Validate configuration
//! dimensions check-config --config dimensions.toml
//!
//! # Close a window every 10,000 events
//! cat events.jsonl | dimensions run --config dimensions.toml --window-size 10000
//!
//! # Dump Prometheus metrics after the run
//! dimensions run --input events.jsonl --metrics-out metrics.prom
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use dimensions_compute::config::{Config, MonitoringConfig};
use dimensions_compute::dimensions::{
    AggregatorRegistry, DimensionalSchema, DimensionsComputation, JsonLinesSink, Record,
    RecordConverter,
};
use dimensions_compute::error::{ConfigurationError, Error};
use dimensions_compute::metrics;

#[derive(Parser)]
#[command(name = "dimensions")]
#[command(version)]
#[command(about = "Multi-dimensional streaming aggregation over JSON events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "dimensions.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file and schema
    CheckConfig,

    /// Aggregate newline-delimited JSON events
    Run {
        /// Input file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Close a window every N events (0 = only at end of input)
        #[arg(short, long, default_value_t = 0)]
        window_size: usize,

        /// Write Prometheus metrics to this file when the run completes
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
}

fn init_tracing(monitoring: &MonitoringConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&monitoring.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if monitoring.structured_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_schema(config: &Config) -> Result<DimensionalSchema, Error> {
    let definition = config.schema.as_ref().ok_or_else(|| {
        ConfigurationError::Invalid("Configuration has no [schema] section".to_string())
    })?;
    Ok(DimensionalSchema::build(
        definition,
        &AggregatorRegistry::default(),
    )?)
}

fn cmd_check_config(config: &Config) -> Result<(), Error> {
    config.validate()?;
    let schema = load_schema(config)?;

    println!("Configuration is valid!");
    println!();
    println!("Engine Settings:");
    println!("  Schema id: {}", config.engine.schema_id);
    println!("  Emit mode: {}", config.engine.emit_mode.as_str());
    println!("  Failure policy: {}", config.engine.failure_policy.as_str());
    println!();
    println!("Schema:");
    for combination in schema.combinations() {
        let keys: Vec<_> = combination.key_descriptor().names().collect();
        let aggregators: Vec<_> = combination.bindings().iter().map(|b| b.name()).collect();
        println!(
            "  [{}] keys=({}) aggregators=({})",
            combination.id(),
            keys.join(", "),
            aggregators.join(", ")
        );
    }
    println!("  Total slots: {}", schema.pair_count());
    println!();
    println!("Monitoring:");
    println!("  Prometheus enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

fn cmd_run(
    config: &Config,
    input: Option<&PathBuf>,
    window_size: usize,
    metrics_out: Option<&PathBuf>,
) -> Result<(), Error> {
    let sink = JsonLinesSink::new(BufWriter::new(io::stdout()));
    let mut computation = DimensionsComputation::from_config(
        config,
        &AggregatorRegistry::default(),
        RecordConverter,
        sink,
    )?;

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };

    let mut in_window = 0usize;
    let mut rejected = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed event");
                rejected += 1;
                continue;
            }
        };

        if let Err(e) = computation.process_event(&record) {
            warn!(line = line_no + 1, error = %e, "Event rejected");
            rejected += 1;
            continue;
        }

        in_window += 1;
        if window_size > 0 && in_window == window_size {
            let emitted = computation.on_window_close()?;
            debug!(emitted, "Window closed");
            computation.on_window_open()?;
            in_window = 0;
        }
    }

    computation.on_window_close()?;
    computation.shutdown();

    let stats = computation.stats();
    info!(
        events = stats.events_processed,
        rejected,
        pairs_skipped = stats.pairs_skipped,
        records = stats.records_emitted,
        windows = stats.windows_flushed,
        "Run complete"
    );

    if let Some(path) = metrics_out {
        std::fs::write(path, metrics::gather_metrics())?;
        info!(path = %path.display(), "Metrics written");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::from_file_with_env(&cli.config)?;
    init_tracing(&config.monitoring);

    match &cli.command {
        Commands::CheckConfig => cmd_check_config(&config)?,
        Commands::Run {
            input,
            window_size,
            metrics_out,
        } => cmd_run(&config, input.as_ref(), *window_size, metrics_out.as_ref())?,
    }
    Ok(())
}
