//! Rationale text for confirmed anomalies.

use chrono::NaiveDate;

/// Builds the statistical explanation for one anomaly. Pure function of its inputs.
pub fn explain(
    metric: &str,
    value: f64,
    date: NaiveDate,
    mean: f64,
    z_score: Option<f64>,
) -> String {
    let high = value > mean;
    let (level, side) = if high {
        ("high", "above")
    } else {
        ("low", "below")
    };

    let mut text = format!("Unusually {level} {metric} value ({value:.2}) detected on {date}.");
    if let Some(z) = z_score {
        text.push_str(&format!(
            " This is {z:.2} standard deviations {side} the mean."
        ));
    }
    text.push(' ');
    text.push_str(cause_hint(metric, high));
    text
}

fn cause_hint(metric: &str, high: bool) -> &'static str {
    match (metric, high) {
        ("consumption", true) => {
            "This could indicate equipment malfunction, unusual activity, or a data recording error."
        }
        ("consumption", false) => {
            "This could indicate reduced facility usage, power outage, or a data recording error."
        }
        ("solar", true) => {
            "This could indicate exceptionally good weather conditions or recent system optimization."
        }
        ("solar", false) => {
            "This could indicate cloudy weather, panel malfunction, or maintenance issues."
        }
        ("price", true) => {
            "This price spike could be due to peak demand charges or utility rate changes."
        }
        ("price", false) => "This price drop could be due to off-peak rates or utility incentives.",
        (_, true) => "The reading sits well above its usual range and should be reviewed.",
        (_, false) => "The reading sits well below its usual range and should be reviewed.",
    }
}
