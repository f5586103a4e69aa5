use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Metric name -> value. Missing or unparseable values are NaN.
pub type MetricMap = BTreeMap<String, f64>;

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..s.len().min(10))?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Reads a number as formatted by a spreadsheet: `,` thousands separators and a
/// trailing `%` are accepted (`"5,000"` -> 5000, `"45%"` -> 45). Anything else
/// that does not parse is NaN.
pub(crate) fn parse_number(s: &str) -> f64 {
    let s = s.trim();
    let s = s.strip_suffix('%').unwrap_or(s).trim_end();
    let cleaned: String = s.chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() {
        return f64::NAN;
    }
    cleaned.parse().unwrap_or(f64::NAN)
}

fn deserialize_naive_date<'de, D>(d: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    parse_date(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {s}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

fn deserialize_metrics<'de, D>(d: D) -> Result<MetricMap, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, RawValue> = BTreeMap::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|(name, v)| {
            let value = match v {
                RawValue::Number(n) => n,
                RawValue::Text(s) => parse_number(&s),
                RawValue::Other(_) => f64::NAN,
            };
            (name, value)
        })
        .collect())
}

// serde_json writes non-finite floats as null already; keep it explicit so
// other formats behave the same.
fn serialize_metrics<S>(metrics: &MetricMap, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let cleaned: BTreeMap<&str, Option<f64>> = metrics
        .iter()
        .map(|(k, v)| (k.as_str(), v.is_finite().then_some(*v)))
        .collect();
    cleaned.serialize(s)
}

/// One observation: a date and its metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(deserialize_with = "deserialize_naive_date")]
    pub date: NaiveDate,
    #[serde(
        default,
        deserialize_with = "deserialize_metrics",
        serialize_with = "serialize_metrics"
    )]
    pub metrics: MetricMap,
}

impl MetricRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            metrics: MetricMap::new(),
        }
    }

    pub fn with(mut self, metric: &str, value: f64) -> Self {
        self.metrics.insert(metric.to_string(), value);
        self
    }

    /// Value for `metric`, NaN when absent.
    pub fn value(&self, metric: &str) -> f64 {
        self.metrics.get(metric).copied().unwrap_or(f64::NAN)
    }
}

/// Forecast output for a future date. Same shape as a record's metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictedRecord {
    pub date: NaiveDate,
    pub metrics: MetricMap,
}

/// One confirmed outlier for one metric on one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub metric: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// `None` when the metric's standard deviation is zero.
    pub z_score: Option<f64>,
    pub iqr_bounds: [f64; 2],
    pub z_score_flag: bool,
    pub iqr_flag: bool,
    pub moving_average_flag: bool,
    pub confidence: f64,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<u8>,
}

/// Number of the three outlier tests that fired.
pub(crate) fn tests_fired(z_score_flag: bool, iqr_flag: bool, moving_average_flag: bool) -> usize {
    [z_score_flag, iqr_flag, moving_average_flag]
        .into_iter()
        .filter(|&f| f)
        .count()
}

impl Anomaly {
    pub fn tests_fired(&self) -> usize {
        tests_fired(self.z_score_flag, self.iqr_flag, self.moving_average_flag)
    }
}
