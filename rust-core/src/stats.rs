//! Small statistics helpers shared by the detector, forecaster and prompt summaries.

use crate::error::{CoreError, Result};
use crate::models::MetricRecord;

/// Finite values of `metric` paired with the index of the record they came from.
pub fn valid_series(records: &[MetricRecord], metric: &str) -> Vec<(usize, f64)> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let v = r.value(metric);
            v.is_finite().then_some((i, v))
        })
        .collect()
}

/// Rejects empty input and dates that go backwards.
pub fn ensure_chronological(records: &[MetricRecord]) -> Result<()> {
    if records.is_empty() {
        return Err(CoreError::invalid_input("record sequence is empty"));
    }
    if let Some(w) = records.windows(2).find(|w| w[1].date < w[0].date) {
        return Err(CoreError::invalid_input(format!(
            "records out of order: {} follows {}",
            w[1].date, w[0].date
        )));
    }
    Ok(())
}

/// Population mean and standard deviation (divides by N).
pub fn mean_std(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 0.0);
    }
    // Summation error must not turn a flat series into a tiny non-zero spread.
    if vals.iter().all(|&v| v == vals[0]) {
        return (vals[0], 0.0);
    }
    let n = vals.len() as f64;
    let sum: f64 = vals.iter().sum();
    let mean = sum / n;
    let sq_diff: f64 = vals.iter().map(|v| (v - mean).powi(2)).sum();
    let std = (sq_diff / n).sqrt();
    (mean, std)
}

/// Rank-based quartiles: `sorted[floor(0.25 n)]` and `sorted[floor(0.75 n)]`, no interpolation.
/// Returns `None` for an empty slice.
pub fn quartiles(vals: &[f64]) -> Option<(f64, f64)> {
    if vals.is_empty() {
        return None;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[(n * 3) / 4];
    Some((q1, q3))
}

/// Tukey fences `[q1 - k*iqr, q3 + k*iqr]`.
pub fn iqr_bounds(vals: &[f64], multiplier: f64) -> Option<[f64; 2]> {
    let (q1, q3) = quartiles(vals)?;
    let iqr = q3 - q1;
    Some([q1 - multiplier * iqr, q3 + multiplier * iqr])
}

/// Mean of the `window` values before each position `i >= window`.
/// Element `j` of the result belongs to position `j + window`.
pub fn trailing_means(vals: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || vals.len() <= window {
        return vec![];
    }
    (window..vals.len())
        .map(|i| vals[i - window..i].iter().sum::<f64>() / window as f64)
        .collect()
}

/// `|value - reference| / |reference|`. A zero reference gives infinity for
/// any non-zero value and zero otherwise.
pub fn relative_deviation(value: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        if value == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        ((value - reference) / reference).abs()
    }
}
