//! Pattern-replay forecast: repeat the trailing window of each metric with small jitter.
//!
//! This does not fit a model. A trend longer than one pattern cycle is not
//! extrapolated; the output only ever replays values already seen.

use crate::error::{CoreError, Result};
use crate::models::{MetricMap, MetricRecord, PredictedRecord};
use crate::stats::{ensure_chronological, valid_series};
use chrono::{Months, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Every numeric column of the campus sheet, in dashboard order.
pub const DEFAULT_FORECAST_METRICS: [&str; 20] = [
    "consumption",
    "solar",
    "otherSources",
    "savings",
    "solarPercentage",
    "totalSavings",
    "htc179",
    "htc232",
    "totalGED",
    "solarCapex",
    "solarOpex",
    "c2kWh",
    "c2SolarPercentage",
    "rsPerKWh",
    "savingsFrom1MWpSolar",
    "savingsFromCapex",
    "price",
    "htc179Amount",
    "htc232Amount",
    "totalAmount",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Number of months to project.
    pub horizon: usize,
    /// Longest trailing window replayed.
    pub max_pattern: usize,
    /// Metrics with fewer valid values get zeros.
    pub min_samples: usize,
    /// Multiplicative jitter is drawn from `[-jitter, +jitter]`.
    pub jitter: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 6,
            max_pattern: 12,
            min_samples: 2,
            jitter: 0.01,
        }
    }
}

/// Project `config.horizon` monthly records after the last input date.
///
/// The random source is injected so callers can seed it.
pub fn forecast<S, R>(
    records: &[MetricRecord],
    metrics: &[S],
    config: &ForecastConfig,
    rng: &mut R,
) -> Result<Vec<PredictedRecord>>
where
    S: AsRef<str>,
    R: Rng + ?Sized,
{
    ensure_chronological(records)?;
    if !(config.jitter.is_finite() && config.jitter >= 0.0) {
        return Err(CoreError::invalid_input(format!(
            "jitter must be a non-negative number, got {}",
            config.jitter
        )));
    }
    let last_date = records[records.len() - 1].date;
    let dates = month_steps(last_date, config.horizon)?;

    let mut out: Vec<PredictedRecord> = dates
        .into_iter()
        .map(|date| PredictedRecord {
            date,
            metrics: MetricMap::new(),
        })
        .collect();

    for metric in metrics.iter().map(AsRef::as_ref) {
        let values: Vec<f64> = valid_series(records, metric)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        let projected = project(&values, config, rng);
        if projected.is_empty() {
            debug!(metric, valid = values.len(), "too few values, filling with zeros");
        }
        for (i, rec) in out.iter_mut().enumerate() {
            let v = projected.get(i).copied().unwrap_or(0.0);
            rec.metrics.insert(metric.to_string(), v);
        }
    }

    info!(
        horizon = config.horizon,
        metrics = metrics.len(),
        from = %last_date,
        "forecast generated"
    );
    Ok(out)
}

/// Replays the trailing pattern of `values` for `config.horizon` steps.
/// Empty when there are fewer than `config.min_samples` values.
pub fn project<R: Rng + ?Sized>(values: &[f64], config: &ForecastConfig, rng: &mut R) -> Vec<f64> {
    if values.len() < config.min_samples.max(1) || config.horizon == 0 {
        return vec![];
    }
    let pattern = trailing_pattern(values, config.max_pattern);
    (0..config.horizon)
        .map(|i| {
            let base = pattern[i % pattern.len()];
            jitter(base, config.jitter, rng).max(0.0)
        })
        .collect()
}

/// Last `min(len, max_len)` values (at least one when `values` is non-empty).
pub fn trailing_pattern(values: &[f64], max_len: usize) -> &[f64] {
    let p = values.len().min(max_len.max(1));
    &values[values.len() - p..]
}

fn jitter<R: Rng + ?Sized>(value: f64, spread: f64, rng: &mut R) -> f64 {
    if spread == 0.0 {
        return value;
    }
    value * (1.0 + rng.gen_range(-spread..=spread))
}

/// `start + 1 month`, `start + 2 months`, ... Day-of-month is clamped to the
/// target month's length.
pub fn month_steps(start: NaiveDate, count: usize) -> Result<Vec<NaiveDate>> {
    (1..=count)
        .map(|k| {
            u32::try_from(k)
                .ok()
                .and_then(|k| start.checked_add_months(Months::new(k)))
                .ok_or_else(|| {
                    CoreError::invalid_input(format!("cannot step {k} months past {start}"))
                })
        })
        .collect()
}
