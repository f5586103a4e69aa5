//! Optional second stage: prompts for an external narrative service, validation of
//! what comes back, and a pure merge of the narrative into a detection report.
//!
//! Nothing here can change which anomalies were found or their statistics.

use crate::anomaly::DetectionReport;
use crate::error::{CoreError, Result};
use crate::models::{parse_date, Anomaly, MetricRecord};
use crate::stats::valid_series;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Anomalies described in a single prompt.
pub const MAX_PROMPT_ANOMALIES: usize = 10;
/// Records sampled into an insights prompt.
pub const DEFAULT_SAMPLE_LIMIT: usize = 50;

/// Anything that turns a prompt into free text, e.g. a hosted language model.
pub trait NarrativeService {
    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub records: usize,
    /// Metrics without any valid value are left out.
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl DatasetSummary {
    pub fn from_records<S: AsRef<str>>(records: &[MetricRecord], metrics: &[S]) -> Self {
        let summaries = metrics
            .iter()
            .map(AsRef::as_ref)
            .filter_map(|m| {
                let vals: Vec<f64> = valid_series(records, m).into_iter().map(|(_, v)| v).collect();
                if vals.is_empty() {
                    return None;
                }
                let mean = vals.iter().sum::<f64>() / vals.len() as f64;
                let min = vals.iter().copied().fold(f64::INFINITY, f64::min);
                let max = vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Some((m.to_string(), MetricSummary { mean, min, max }))
            })
            .collect();
        Self {
            first_date: records.first().map(|r| r.date),
            last_date: records.last().map(|r| r.date),
            records: records.len(),
            metrics: summaries,
        }
    }

    fn time_range(&self) -> String {
        match (self.first_date, self.last_date) {
            (Some(a), Some(b)) => format!("{a} to {b}"),
            _ => "no data".to_string(),
        }
    }
}

/// Narrative for one anomaly, already validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Narrative {
    pub date: NaiveDate,
    pub metric: String,
    pub explanation: Option<String>,
    pub impact: Option<String>,
    pub recommendations: Option<String>,
    /// 1..=5
    pub confidence: Option<u8>,
}

/// Prompt asking the service to explain up to [`MAX_PROMPT_ANOMALIES`] anomalies as JSON.
pub fn anomaly_prompt(summary: &DatasetSummary, anomalies: &[Anomaly]) -> String {
    let mut lines = vec![
        "You are an expert energy data analyst. Analyze these anomalies in our energy \
         consumption data and provide detailed explanations."
            .to_string(),
        String::new(),
        "Data context:".to_string(),
        format!("- Time range: {}", summary.time_range()),
    ];
    lines.extend(summary.metrics.iter().map(|(name, m)| {
        format!(
            "- {name}: mean={:.2}, min={:.2}, max={:.2}",
            m.mean, m.min, m.max
        )
    }));

    lines.push(String::new());
    lines.push("Detected anomalies:".to_string());
    lines.extend(anomalies.iter().take(MAX_PROMPT_ANOMALIES).map(|a| {
        let z = a
            .z_score
            .map(|z| format!("{z:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Date: {}, Metric: {}, Value: {:.2}, Mean: {:.2}, Z-score: {z}",
            a.date, a.metric, a.value, a.mean
        )
    }));

    lines.push(String::new());
    lines.push(
        "For each anomaly, provide:\n\
         1. A detailed explanation of what might have caused it\n\
         2. The potential impact on energy efficiency and costs\n\
         3. Recommended actions to address similar anomalies in the future\n\
         4. A confidence score (1-5) for your explanation\n\n\
         Respond with a JSON object of the form:\n\
         {\"anomalies\": [{\"date\": \"YYYY-MM-DD\", \"metric\": \"metric_name\", \
         \"explanation\": \"...\", \"impact\": \"...\", \"recommendations\": \"...\", \
         \"confidence\": 3}]}"
            .to_string(),
    );
    lines.join("\n") + "\n"
}

/// Prompt asking for general insights over an evenly spaced sample of the records.
pub fn insights_prompt(
    records: &[MetricRecord],
    anomalies: &[Anomaly],
    sample_limit: usize,
    heading: &str,
) -> String {
    let n = records.len();
    let average = |metric: &str| {
        let vals = valid_series(records, metric);
        if vals.is_empty() {
            0.0
        } else {
            vals.iter().map(|&(_, v)| v).sum::<f64>() / vals.len() as f64
        }
    };
    let total_savings: f64 = valid_series(records, "savings").iter().map(|&(_, v)| v).sum();
    let range = match (records.first(), records.last()) {
        (Some(a), Some(b)) => format!("{} to {}", a.date, b.date),
        _ => "no data".to_string(),
    };

    let mut lines = vec![
        "Analyze this energy consumption data and provide insights. \
         Focus on trends, patterns, and anomalies."
            .to_string(),
        String::new(),
        "Data summary:".to_string(),
        format!("- Time period: {range}"),
        format!("- Data points: {n}"),
        format!("- Average consumption: {:.2} kWh", average("consumption")),
        format!("- Average solar percentage: {:.2}%", average("solarPercentage")),
        format!("- Total savings: {total_savings:.2} Rs"),
    ];

    if n > 0 && sample_limit > 0 {
        let step = (n / sample_limit.min(n)).max(1);
        lines.push(String::new());
        lines.push("Sampled records:".to_string());
        lines.extend(records.iter().step_by(step).map(|r| {
            let values: Vec<String> = r
                .metrics
                .iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            format!("{}: {}", r.date, values.join(", "))
        }));
    }

    lines.push(String::new());
    if anomalies.is_empty() {
        lines.push("No significant anomalies detected in the data.".to_string());
    } else {
        let listed: Vec<String> = anomalies
            .iter()
            .take(MAX_PROMPT_ANOMALIES)
            .map(|a| {
                format!(
                    "{}: {} (value: {}, confidence: {:.0}%, explanation: {})",
                    a.date,
                    a.metric,
                    a.value,
                    a.confidence * 100.0,
                    a.explanation
                )
            })
            .collect();
        let mut line = format!("Anomalies detected: {}", listed.join("; "));
        if anomalies.len() > MAX_PROMPT_ANOMALIES {
            line.push_str(&format!(
                " and {} more...",
                anomalies.len() - MAX_PROMPT_ANOMALIES
            ));
        }
        lines.push(line);
    }

    lines.push(String::new());
    lines.push(format!(
        "Please provide:\n\
         1. Key insights about consumption patterns (seasonal trends, growth rates)\n\
         2. Analysis of solar utilization trends and optimization opportunities\n\
         3. Financial analysis (savings, ROI, cost efficiency)\n\
         4. Detailed explanation of anomalies with possible causes\n\
         5. Specific recommendations for energy optimization\n\n\
         Format the response with markdown headings and bullet points, starting with \
         the heading \"## {heading}\"."
    ));
    lines.join("\n") + "\n"
}

fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn confidence_field(obj: &serde_json::Map<String, Value>) -> Option<u8> {
    let raw = match obj.get("confidence")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let rounded = raw.round();
    (1.0..=5.0).contains(&rounded).then_some(rounded as u8)
}

/// Validate service output. The outermost `{...}` span must parse as JSON with an
/// `anomalies` array; entries without a usable date and metric are dropped.
pub fn parse_narratives(text: &str) -> Result<Vec<Narrative>> {
    let start = text
        .find('{')
        .ok_or_else(|| CoreError::Narrative("no JSON object in response".to_string()))?;
    let end = text
        .rfind('}')
        .filter(|&e| e > start)
        .ok_or_else(|| CoreError::Narrative("unterminated JSON object".to_string()))?;
    let doc: Value = serde_json::from_str(&text[start..=end])?;
    let items = doc
        .get("anomalies")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Narrative("missing `anomalies` array".to_string()))?;

    let parsed: Vec<Narrative> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let date = obj.get("date").and_then(Value::as_str).and_then(parse_date)?;
            let metric = text_field(obj, "metric")?;
            Some(Narrative {
                date,
                metric,
                explanation: text_field(obj, "explanation"),
                impact: text_field(obj, "impact"),
                recommendations: text_field(obj, "recommendations"),
                confidence: confidence_field(obj),
            })
        })
        .collect();
    if parsed.len() < items.len() {
        debug!(
            dropped = items.len() - parsed.len(),
            "dropped malformed narrative entries"
        );
    }
    Ok(parsed)
}

fn narrative_suffix(n: &Narrative) -> String {
    let mut parts = Vec::new();
    if let Some(e) = &n.explanation {
        parts.push(format!("\n\nAI Analysis: {e}"));
    }
    if let Some(i) = &n.impact {
        parts.push(format!("\nImpact: {i}"));
    }
    if let Some(r) = &n.recommendations {
        parts.push(format!("\nRecommendations: {r}"));
    }
    parts.concat()
}

/// Attach narratives to matching anomalies (same date and metric).
///
/// Output depends only on the statistical part of `base` and on `narratives`:
/// AI fields already present on `base` are cleared and the explanation map is
/// rebuilt from each anomaly's statistical explanation. Narratives that match no
/// anomaly are ignored.
pub fn enrich(base: &DetectionReport, narratives: &[Narrative]) -> DetectionReport {
    let mut enriched = base.clone();
    let mut explanations = DetectionReport::rebuild_explanations(&base.anomalies);

    for anomaly in enriched.anomalies.iter_mut() {
        anomaly.ai_explanation = None;
        anomaly.impact = None;
        anomaly.recommendations = None;
        anomaly.ai_confidence = None;

        let Some(n) = narratives
            .iter()
            .find(|n| n.date == anomaly.date && n.metric == anomaly.metric)
        else {
            continue;
        };
        anomaly.ai_explanation = n.explanation.clone();
        anomaly.impact = n.impact.clone();
        anomaly.recommendations = n.recommendations.clone();
        anomaly.ai_confidence = n.confidence;

        if let Some(text) = explanations
            .get_mut(&anomaly.date)
            .and_then(|m| m.get_mut(&anomaly.metric))
        {
            *text = format!("{}{}", anomaly.explanation, narrative_suffix(n));
        }
    }
    enriched.explanations = explanations;
    enriched
}

/// Prompt the service and merge its answer. Any failure leaves `base` untouched.
pub fn analyze_with<N: NarrativeService + ?Sized>(
    service: &N,
    base: &DetectionReport,
    summary: &DatasetSummary,
) -> DetectionReport {
    if base.anomalies.is_empty() {
        return base.clone();
    }
    let prompt = anomaly_prompt(summary, &base.anomalies);
    match service.generate(&prompt).and_then(|text| parse_narratives(&text)) {
        Ok(narratives) => enrich(base, &narratives),
        Err(e) => {
            warn!(error = %e, "narrative enrichment failed, keeping statistical explanations");
            base.clone()
        }
    }
}
