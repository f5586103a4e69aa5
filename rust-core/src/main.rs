//! CLI: stdin JSON -> stdout JSON. Logs go to stderr.
//!
//! Usage:
//!   echo '{"records":[...], "params":{...}}' | energy-analytics anomaly
//!   echo '{"records":[...], "params":{"horizon":6}}' | energy-analytics forecast --seed 7
//!   echo '{"rows":[[...], ...], "params":{"year":2024}}' | energy-analytics map
use anyhow::Context;
use clap::{Parser, Subcommand};
use energy_core::{
    detect_anomalies, forecast, map_rows, DetectionReport, DetectorConfig, ForecastConfig,
    MetricRecord, PredictedRecord, SheetRowMapper, DEFAULT_DETECTION_METRICS,
    DEFAULT_FORECAST_METRICS,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "energy-analytics", version, about = "Energy anomaly detection and forecasting")]
struct Cli {
    /// Pretty-print the JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Flag outliers confirmed by at least two of three tests
    Anomaly,
    /// Project the next months by replaying each metric's recent pattern
    Forecast {
        /// Seed for the jitter; random when omitted
        #[arg(long, env = "ENERGY_FORECAST_SEED")]
        seed: Option<u64>,
    },
    /// Convert raw sheet rows into records
    Map,
}

// --- Anomaly structs ---

#[derive(Debug, Deserialize)]
struct AnomalyInput {
    records: Vec<MetricRecord>,
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default)]
    params: DetectorConfig,
}

// --- Forecast structs ---

#[derive(Debug, Deserialize)]
struct ForecastInput {
    records: Vec<MetricRecord>,
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default)]
    params: ForecastConfig,
}

#[derive(Debug, Serialize)]
struct ForecastOutput {
    predictions: Vec<PredictedRecord>,
}

// --- Mapping structs ---

#[derive(Debug, Deserialize)]
struct MapInput {
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    params: SheetRowMapper,
}

#[derive(Debug, Serialize)]
struct MapOutput {
    records: Vec<MetricRecord>,
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn metrics_or(requested: Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    requested.unwrap_or_else(|| defaults.iter().map(|s| s.to_string()).collect())
}

fn write_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(io::stdout(), value)?;
    } else {
        serde_json::to_writer(io::stdout(), value)?;
    }
    Ok(())
}

fn run_anomaly(pretty: bool) -> anyhow::Result<()> {
    let input: AnomalyInput =
        serde_json::from_reader(io::stdin()).context("reading anomaly input")?;
    let metrics = metrics_or(input.metrics, &DEFAULT_DETECTION_METRICS);
    let report: DetectionReport = detect_anomalies(&input.records, &metrics, &input.params)?;
    write_json(&report, pretty)
}

fn run_forecast(seed: Option<u64>, pretty: bool) -> anyhow::Result<()> {
    let input: ForecastInput =
        serde_json::from_reader(io::stdin()).context("reading forecast input")?;
    let metrics = metrics_or(input.metrics, &DEFAULT_FORECAST_METRICS);
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let predictions = forecast(&input.records, &metrics, &input.params, &mut rng)?;
    write_json(&ForecastOutput { predictions }, pretty)
}

fn run_map(pretty: bool) -> anyhow::Result<()> {
    let input: MapInput = serde_json::from_reader(io::stdin()).context("reading sheet rows")?;
    let rows: Vec<Vec<String>> = input
        .rows
        .iter()
        .map(|r| r.iter().map(cell_text).collect())
        .collect();
    let records = map_rows(&input.params, &rows);
    info!(rows = rows.len(), records = records.len(), "mapped sheet rows");
    write_json(&MapOutput { records }, pretty)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Anomaly => run_anomaly(cli.pretty),
        Command::Forecast { seed } => run_forecast(seed, cli.pretty),
        Command::Map => run_map(cli.pretty),
    }
}
