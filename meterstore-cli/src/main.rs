//! CLI for the meterstore storage engine.
//!
//! Provides commands for inspecting, feeding, querying, and benchmarking
//! the stores described by a holder configuration file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use meterstore::{CircularMemStorage, DataHolder, DataItem, DataItemSpec, HolderConfig, TimedStorage};
use tracing_subscriber::EnvFilter;

/// meterstore: Time-ordered storage for metering and sensor samples.
#[derive(Parser)]
#[command(name = "meterstore", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display the configured stores, their sizes and time ranges.
    Info {
        /// Path to the holder configuration file.
        config: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the contents of one store in time order.
    Dump {
        /// Path to the holder configuration file.
        config: PathBuf,

        /// Store name.
        store: String,

        /// Restrict the output to these signals (repeatable).
        #[arg(long = "signal")]
        signals: Vec<String>,

        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Add one sample to a store.
    Record {
        /// Path to the holder configuration file.
        config: PathBuf,

        /// Store name.
        store: String,

        /// Sample time, in seconds since the epoch (default: now).
        #[arg(long)]
        timestamp: Option<f64>,

        /// Signal value as NAME=VALUE or NAME=VALUE:UNIT (repeatable).
        #[arg(long = "value", required = true)]
        values: Vec<String>,
    },

    /// Average a store over a time range.
    Average {
        /// Path to the holder configuration file.
        config: PathBuf,

        /// Store name.
        store: String,

        /// Range start, in seconds since the epoch (default: oldest sample).
        #[arg(long)]
        from: Option<f64>,

        /// Range end, in seconds since the epoch (default: newest sample).
        #[arg(long)]
        to: Option<f64>,

        /// Signals to average (repeatable, default: all of the store).
        #[arg(long = "signal")]
        signals: Vec<String>,

        /// Sampling period in seconds; applies the configured shift.
        #[arg(long)]
        sampling_period: Option<f64>,
    },

    /// Run an ingest microbenchmark on an in-memory ring.
    Bench {
        /// Number of samples to write.
        #[arg(long, default_value = "1000000")]
        points: u32,

        /// Ring capacity.
        #[arg(long, default_value = "3600")]
        capacity: usize,
    },
}

/// Output format for inspection commands.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { config, format } => cmd_info(&config, &format),
        Commands::Dump {
            config,
            store,
            signals,
            format,
        } => cmd_dump(&config, &store, &signals, &format),
        Commands::Record {
            config,
            store,
            timestamp,
            values,
        } => cmd_record(&config, &store, timestamp, &values),
        Commands::Average {
            config,
            store,
            from,
            to,
            signals,
            sampling_period,
        } => cmd_average(&config, &store, from, to, &signals, sampling_period),
        Commands::Bench { points, capacity } => cmd_bench(points, capacity),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn open_holder(config_path: &Path) -> Result<DataHolder, Box<dyn std::error::Error>> {
    let config = HolderConfig::from_file(config_path)?;
    Ok(DataHolder::open(&config)?)
}

/// Implements `meterstore info <config>`.
fn cmd_info(config_path: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let holder = open_holder(config_path)?;

    if let OutputFormat::Json = format {
        let infos: Vec<_> = holder.data_stores().map(meterstore::DataStore::info).collect();
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    println!("Config: {}", config_path.display());
    if let Some(shift) = holder.shift() {
        println!("Shift: {} by {} s", shift.signal, shift.shift_seconds);
    }
    println!();

    for store in holder.data_stores() {
        let info = store.info();
        println!("  Store \"{}\"", info.name);
        println!("    Kind: {} {}", info.persistency, info.lifespan);
        if let Some(capacity) = info.buffer_length {
            println!("    Capacity: {capacity}");
        }
        if let Some(table) = &info.table {
            println!("    Table: {table}");
        }
        println!("    Signals: {}", info.signals.join(", "));
        println!("    Items: {}", info.length);
        if let Some(range) = store.storage().timestamp_range()? {
            println!(
                "    Range: {:.3} .. {:.3} ({:.1} s)",
                range.first,
                range.last,
                range.span()
            );
        }
        println!();
    }

    if let Some(db) = holder.database() {
        let total_size = dir_size(db.path())?;
        println!(
            "Total disk usage: {} ({total_size} bytes)",
            format_bytes(total_size)
        );
    }

    Ok(())
}

/// Implements `meterstore dump <config> <store>`.
fn cmd_dump(
    config_path: &Path,
    store: &str,
    signals: &[String],
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let holder = open_holder(config_path)?;

    match format {
        OutputFormat::Text if signals.is_empty() => {
            for line in holder.data_store(store)?.storage().dump()? {
                println!("{line}");
            }
        }
        OutputFormat::Text => {
            let serialized = holder.serialize(store, Some(signals))?;
            println!("timestamp,{}", signals.join(","));
            for (row, timestamp) in serialized.timestamp.iter().enumerate() {
                let cells: Vec<String> = signals
                    .iter()
                    .map(|s| {
                        serialized
                            .values(s)
                            .and_then(|column| column[row])
                            .map_or_else(String::new, |v| v.to_string())
                    })
                    .collect();
                println!("{timestamp},{}", cells.join(","));
            }
        }
        OutputFormat::Json => {
            let selection = (!signals.is_empty()).then_some(signals);
            let serialized = holder.serialize(store, selection)?;
            println!("{}", serde_json::to_string_pretty(&serialized)?);
        }
    }

    Ok(())
}

/// Implements `meterstore record <config> <store>`.
fn cmd_record(
    config_path: &Path,
    store: &str,
    timestamp: Option<f64>,
    values: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let holder = open_holder(config_path)?;

    let timestamp = match timestamp {
        Some(t) => t,
        None => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs_f64(),
    };

    let mut spec = DataItemSpec::new();
    let mut parsed = Vec::with_capacity(values.len());
    for raw in values {
        let (name, value, unit) = parse_value(raw)?;
        spec.add_element(name, unit)?;
        parsed.push((name, value));
    }

    let mut item = DataItem::new(spec.into(), Some(timestamp));
    for (name, value) in parsed {
        item.set_value(name, value)?;
    }

    holder.add_measurement(store, &item)?;
    holder.sync()?;
    tracing::debug!(store, timestamp, signals = item.spec().len(), "recorded sample");
    println!("{store}: {item}");

    Ok(())
}

/// Implements `meterstore average <config> <store>`.
fn cmd_average(
    config_path: &Path,
    store: &str,
    from: Option<f64>,
    to: Option<f64>,
    signals: &[String],
    sampling_period: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let holder = open_holder(config_path)?;
    let data_store = holder.data_store(store)?;

    let Some(range) = data_store.storage().timestamp_range()? else {
        return Err(format!("Store '{store}' is empty").into());
    };
    let from = from.unwrap_or(range.first);
    let to = to.unwrap_or(range.last);

    let signals = if signals.is_empty() {
        data_store.signals()
    } else {
        signals
    };

    let shift = match (sampling_period, holder.shift()) {
        (Some(period), Some(shift)) => Some(shift.in_samples(period)?),
        (Some(_), None) => return Err("No shift configured".into()),
        (None, _) => None,
    };

    let average = holder.get_average(store, from, to, signals, shift.as_ref())?;
    println!("# store={store}, from={from:.3}, to={to:.3}");
    for signal in signals {
        println!("{signal} = {}", average.value_and_unit(signal)?);
    }

    Ok(())
}

/// Implements `meterstore bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(points: u32, capacity: usize) -> Result<(), Box<dyn std::error::Error>> {
    const SIGNALS: [&str; 4] = ["current_usage", "solar_power", "gas_usage", "temperature"];

    println!("meterstore ingest benchmark");
    println!("  Points: {points}");
    println!("  Capacity: {capacity}");
    println!();

    let storage = CircularMemStorage::new(capacity, SIGNALS)?;
    let spec = storage.spec();
    let base_time = 1_700_000_000.0;

    println!("Writing {points} samples of {} signals...", SIGNALS.len());

    let start = Instant::now();
    for i in 0..points {
        let t = base_time + f64::from(i);
        let mut item = DataItem::new(spec.clone(), Some(t));
        for signal in SIGNALS {
            item.set_value(signal, f64::from(i % 1000))?;
        }
        storage.add_data_item(&item)?;
    }
    let elapsed = start.elapsed();

    let ns_per_write = elapsed.as_nanos() as f64 / f64::from(points.max(1));
    let writes_per_sec = f64::from(points) / elapsed.as_secs_f64();

    let signals: Vec<String> = SIGNALS.iter().map(|s| (*s).to_string()).collect();
    let average_start = Instant::now();
    if let Some(range) = storage.timestamp_range()? {
        storage.average(range.first, range.last, &signals, None)?;
    }
    let average_elapsed = average_start.elapsed();

    println!();
    println!("Results:");
    println!("  Total writes: {points}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");
    println!("  Full-ring average: {average_elapsed:.3?}");
    println!();

    Ok(())
}

/// Parses `NAME=VALUE` or `NAME=VALUE:UNIT`.
fn parse_value(raw: &str) -> Result<(&str, f64, Option<&str>), Box<dyn std::error::Error>> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("Expected NAME=VALUE[:UNIT], got '{raw}'"))?;
    let (value, unit) = match rest.split_once(':') {
        Some((value, unit)) => (value, Some(unit)),
        None => (rest, None),
    };
    Ok((name.trim(), value.trim().parse()?, unit.map(str::trim)))
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
