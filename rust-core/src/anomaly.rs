//! Multi-test outlier detection: Z-score, IQR fences and moving-average deviation,
//! confirmed by a 2-of-3 vote.

use crate::error::Result;
use crate::explain::explain;
use crate::models::{tests_fired, Anomaly, MetricRecord};
use crate::stats::{
    ensure_chronological, iqr_bounds, mean_std, relative_deviation, trailing_means, valid_series,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Metrics the dashboard checks by default.
pub const DEFAULT_DETECTION_METRICS: [&str; 5] =
    ["consumption", "solar", "solarPercentage", "savings", "price"];

/// date -> metric -> explanation
pub type ExplanationMap = BTreeMap<NaiveDate, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Metrics with fewer valid values are skipped.
    pub min_samples: usize,
    pub z_threshold: f64,
    pub iqr_multiplier: f64,
    /// Upper bound on the moving-average window; the window is also capped at n/3.
    pub max_window: usize,
    /// Relative deviation from the trailing mean that counts as a flag.
    pub max_relative_deviation: f64,
    /// Tests that must agree before a value is reported.
    pub quorum: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            z_threshold: 3.0,
            iqr_multiplier: 1.5,
            max_window: 5,
            max_relative_deviation: 0.30,
            quorum: 2,
        }
    }
}

/// Output of one detector run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    /// Concatenated per metric, in the order the metrics were requested.
    pub anomalies: Vec<Anomaly>,
    pub explanations: ExplanationMap,
    /// Metrics that had too few valid values to be checked.
    pub skipped: Vec<String>,
}

impl DetectionReport {
    pub fn for_metric<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = &'a Anomaly> + 'a {
        self.anomalies.iter().filter(move |a| a.metric == metric)
    }

    pub(crate) fn rebuild_explanations(anomalies: &[Anomaly]) -> ExplanationMap {
        let mut map = ExplanationMap::new();
        for a in anomalies {
            map.entry(a.date)
                .or_default()
                .insert(a.metric.clone(), a.explanation.clone());
        }
        map
    }
}

/// Run all three tests over each metric and keep the values a quorum agrees on.
///
/// Returns `InvalidInput` for an empty or out-of-order sequence. Metrics with too
/// few valid values are listed in [`DetectionReport::skipped`].
pub fn detect_anomalies<S: AsRef<str>>(
    records: &[MetricRecord],
    metrics: &[S],
    config: &DetectorConfig,
) -> Result<DetectionReport> {
    ensure_chronological(records)?;

    let mut report = DetectionReport::default();
    for metric in metrics.iter().map(AsRef::as_ref) {
        match detect_metric(records, metric, config) {
            Some(found) => report.anomalies.extend(found),
            None => {
                debug!(metric, "skipping metric with insufficient data");
                report.skipped.push(metric.to_string());
            }
        }
    }
    report.explanations = DetectionReport::rebuild_explanations(&report.anomalies);

    info!(
        records = records.len(),
        anomalies = report.anomalies.len(),
        skipped = report.skipped.len(),
        "anomaly detection finished"
    );
    Ok(report)
}

/// `None` when the metric has fewer than `min_samples` valid values.
///
/// All three tests run over the valid-filtered series. The moving-average window
/// is the `w` preceding *valid* values, so missing readings never enter it and a
/// value right after a gap is compared with the last valid readings before it.
fn detect_metric(
    records: &[MetricRecord],
    metric: &str,
    config: &DetectorConfig,
) -> Option<Vec<Anomaly>> {
    let series = valid_series(records, metric);
    let n = series.len();
    if n < config.min_samples.max(1) {
        return None;
    }
    let values: Vec<f64> = series.iter().map(|&(_, v)| v).collect();

    let (mean, std_dev) = mean_std(&values);
    let bounds = iqr_bounds(&values, config.iqr_multiplier)?;
    let window = config.max_window.min(n / 3);
    let trailing = trailing_means(&values, window);

    let mut found = Vec::new();
    for (pos, &(record_idx, value)) in series.iter().enumerate() {
        let z_score = (std_dev > 0.0).then(|| ((value - mean) / std_dev).abs());
        let z_score_flag = z_score.is_some_and(|z| z > config.z_threshold);

        let iqr_flag = value < bounds[0] || value > bounds[1];

        let moving_average_flag = pos
            .checked_sub(window)
            .and_then(|j| trailing.get(j))
            .is_some_and(|&avg| relative_deviation(value, avg) > config.max_relative_deviation);

        let fired = tests_fired(z_score_flag, iqr_flag, moving_average_flag);
        if fired < config.quorum.max(1) {
            continue;
        }

        let date = records[record_idx].date;
        found.push(Anomaly {
            date,
            metric: metric.to_string(),
            value,
            mean,
            std_dev,
            z_score,
            iqr_bounds: bounds,
            z_score_flag,
            iqr_flag,
            moving_average_flag,
            confidence: fired as f64 / 3.0,
            explanation: explain(metric, value, date, mean, z_score),
            ai_explanation: None,
            impact: None,
            recommendations: None,
            ai_confidence: None,
        });
    }
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(metric: &str, values: &[f64]) -> Vec<MetricRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| MetricRecord::new(start + Duration::days(i as i64)).with(metric, v))
            .collect()
    }

    #[test]
    fn test_single_spike_confirmed_by_all_tests() {
        let mut values = vec![10.0; 10];
        values.push(100.0);
        let records = series("consumption", &values);

        let report = detect_anomalies(&records, &["consumption"], &DetectorConfig::default()).unwrap();
        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.date, records[10].date);
        assert_eq!(a.value, 100.0);
        assert!(a.z_score.unwrap() > 3.0);
        assert!(a.z_score_flag && a.iqr_flag && a.moving_average_flag);
        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.iqr_bounds, [10.0, 10.0]);
        assert!(report.skipped.is_empty());
        assert_eq!(
            report.explanations[&records[10].date]["consumption"],
            a.explanation
        );
    }

    #[test]
    fn test_too_few_values_skipped() {
        let records = series("solar", &[1.0, 2.0, 300.0]);
        let report = detect_anomalies(&records, &["solar"], &DetectorConfig::default()).unwrap();
        assert!(report.anomalies.is_empty());
        assert_eq!(report.skipped, vec!["solar".to_string()]);
    }

    #[test]
    fn test_constant_series_has_no_flags() {
        let records = series("price", &[7.0; 20]);
        let report = detect_anomalies(&records, &["price"], &DetectorConfig::default()).unwrap();
        assert!(report.anomalies.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_nan_values_excluded() {
        let mut values = vec![10.0; 10];
        values.insert(3, f64::NAN);
        values.push(100.0);
        let records = series("consumption", &values);
        let report = detect_anomalies(&records, &["consumption"], &DetectorConfig::default()).unwrap();
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].date, records[11].date);
        assert!(report.anomalies[0].mean.is_finite());
    }

    #[test]
    fn test_moving_average_window_skips_missing_values() {
        // Positions 8 and 9 are missing. The window for the final 30 is the three
        // valid 10s before it, not the raw slice [NaN, NaN, 10].
        let mut values = vec![10.0; 8];
        values.extend([f64::NAN, f64::NAN, 10.0, 30.0]);
        let records = series("consumption", &values);

        let report = detect_anomalies(&records, &["consumption"], &DetectorConfig::default()).unwrap();
        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.date, records[11].date);
        assert_eq!(a.value, 30.0);
        // n = 10, mean = 12, std = 6: z is exactly 3, which does not fire.
        assert!(!a.z_score_flag);
        assert!(a.iqr_flag && a.moving_average_flag);
        assert_eq!(a.tests_fired(), 2);
    }

    #[test]
    fn test_value_after_gap_uses_last_valid_window() {
        // A gap followed by a jump: the window straddles the gap, so the value
        // right after it is still judged against the readings before the gap.
        let mut values = vec![10.0; 6];
        values.extend([f64::NAN, f64::NAN, f64::NAN, 40.0, 10.0, 10.0, 10.0]);
        let records = series("solar", &values);

        let report = detect_anomalies(&records, &["solar"], &DetectorConfig::default()).unwrap();
        let dates: Vec<NaiveDate> = report.anomalies.iter().map(|a| a.date).collect();
        assert_eq!(dates, vec![records[9].date]);
        assert!(report.anomalies[0].moving_average_flag);
    }

    #[test]
    fn test_two_of_three_without_z_score() {
        // Step change: IQR and moving average fire, Z-score stays below 3.
        let values = [10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 20.0];
        let records = series("savings", &values);
        let report = detect_anomalies(&records, &["savings"], &DetectorConfig::default()).unwrap();
        let first = &report.anomalies[0];
        assert_eq!(first.value, 20.0);
        assert!(!first.z_score_flag);
        assert!(first.iqr_flag && first.moving_average_flag);
        assert!((first.confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_metric_order_preserved() {
        let mut values = vec![10.0; 10];
        values.push(100.0);
        let mut records = series("consumption", &values);
        for r in records.iter_mut() {
            r.metrics.insert("solar".into(), 5.0);
        }
        records[10].metrics.insert("solar".into(), 50.0);

        let report = detect_anomalies(
            &records,
            &["solar", "consumption", "price"],
            &DetectorConfig::default(),
        )
        .unwrap();
        let order: Vec<&str> = report.anomalies.iter().map(|a| a.metric.as_str()).collect();
        assert_eq!(order, vec!["solar", "consumption"]);
        assert_eq!(report.skipped, vec!["price".to_string()]);
        assert_eq!(report.explanations[&records[10].date].len(), 2);
    }

    #[test]
    fn test_empty_and_unordered_input_rejected() {
        let cfg = DetectorConfig::default();
        assert!(detect_anomalies::<&str>(&[], &["consumption"], &cfg).is_err());
        let mut records = series("consumption", &[1.0; 6]);
        records.swap(0, 5);
        assert!(detect_anomalies(&records, &["consumption"], &cfg).is_err());
    }

    #[test]
    fn test_config_overrides_from_json() {
        let cfg: DetectorConfig = serde_json::from_str(r#"{"z_threshold":2.5}"#).unwrap();
        assert_eq!(cfg.z_threshold, 2.5);
        assert_eq!(cfg.min_samples, 5);
    }
}
