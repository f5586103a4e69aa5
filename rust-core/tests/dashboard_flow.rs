use chrono::{Months, NaiveDate};
use energy_core::{
    detect_anomalies, enrich, forecast, map_rows, DetectorConfig, ForecastConfig, MetricRecord,
    SheetRowMapper, DEFAULT_DETECTION_METRICS, DEFAULT_FORECAST_METRICS,
};
use energy_core::narrative::parse_narratives;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn sheet_row(date: NaiveDate, consumption: f64, solar: f64, price: f64) -> Vec<String> {
    let mut row = vec!["1".to_string(); 20];
    row[1] = date.to_string();
    row[5] = solar.to_string();
    row[7] = consumption.to_string();
    row[8] = format!("{:.0}", solar / consumption * 100.0);
    row[15] = "300".to_string();
    row[19] = price.to_string();
    row
}

fn monthly_rows() -> Vec<Vec<String>> {
    let mut rows = vec![vec![String::new(); 20]; 4];
    let start = ymd(2023, 1, 1);
    for i in 0..24u32 {
        let date = start.checked_add_months(Months::new(i)).unwrap();
        let consumption = if i == 20 { 20_000.0 } else { 5_000.0 + (i % 3) as f64 * 10.0 };
        rows.push(sheet_row(date, consumption, 1_000.0, 850.0));
    }
    rows
}

#[test]
fn rows_to_anomalies_to_enriched_report() {
    let records = map_rows(&SheetRowMapper::default(), &monthly_rows());
    assert_eq!(records.len(), 24);

    let report =
        detect_anomalies(&records, &DEFAULT_DETECTION_METRICS, &DetectorConfig::default()).unwrap();
    let consumption: Vec<_> = report.for_metric("consumption").collect();
    assert_eq!(consumption.len(), 1);
    assert_eq!(consumption[0].date, ymd(2024, 9, 1));
    assert_eq!(consumption[0].confidence, 1.0);
    assert!(consumption[0].explanation.contains("Unusually high consumption"));

    let text = r#"{"anomalies":[{"date":"2024-09-01","metric":"consumption",
        "explanation":"Chiller left running","impact":"Cost","recommendations":"Schedule audit","confidence":5}]}"#;
    let enriched = enrich(&report, &parse_narratives(text).unwrap());
    let merged = &enriched.explanations[&ymd(2024, 9, 1)]["consumption"];
    assert!(merged.contains("AI Analysis: Chiller left running"));
    assert_eq!(enriched.anomalies.len(), report.anomalies.len());
}

#[test]
fn forecast_from_mapped_rows_covers_every_metric() {
    let records = map_rows(&SheetRowMapper::for_year(2024), &monthly_rows());
    assert_eq!(records.len(), 12);

    let mut rng = StdRng::seed_from_u64(2024);
    let out = forecast(&records, &DEFAULT_FORECAST_METRICS, &ForecastConfig::default(), &mut rng)
        .unwrap();
    assert_eq!(out.len(), 6);
    assert_eq!(out[0].date, ymd(2025, 1, 1));
    assert_eq!(out[5].date, ymd(2025, 6, 1));
    for rec in &out {
        assert_eq!(rec.metrics.len(), DEFAULT_FORECAST_METRICS.len());
        assert!(rec.metrics.values().all(|v| *v >= 0.0));
    }
    // January replays the oldest value of the 12-month pattern (2024-01).
    let base = records[0].value("consumption");
    let jan = out[0].metrics["consumption"];
    assert!((jan - base).abs() <= base * 0.01 + 1e-9);
}

#[test]
fn two_value_series_forecast_stays_near_pattern() {
    let records = vec![
        MetricRecord::new(ymd(2024, 1, 10)).with("consumption", 50.0),
        MetricRecord::new(ymd(2024, 2, 10)).with("consumption", 50.0),
    ];
    let cfg = ForecastConfig {
        horizon: 3,
        ..ForecastConfig::default()
    };
    let out = forecast(&records, &["consumption"], &cfg, &mut StdRng::seed_from_u64(9)).unwrap();
    let dates: Vec<_> = out.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![ymd(2024, 3, 10), ymd(2024, 4, 10), ymd(2024, 5, 10)]);
    for r in &out {
        let v = r.metrics["consumption"];
        assert!((49.5..=50.5).contains(&v));
    }
}

#[test]
fn detector_json_output_shape() {
    let mut records: Vec<MetricRecord> = (1..=10)
        .map(|d| MetricRecord::new(ymd(2024, 1, d)).with("price", 10.0))
        .collect();
    records.push(MetricRecord::new(ymd(2024, 1, 11)).with("price", 100.0));
    let report = detect_anomalies(&records, &["price", "solar"], &DetectorConfig::default()).unwrap();

    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["skipped"], serde_json::json!(["solar"]));
    assert_eq!(json["anomalies"][0]["date"], "2024-01-11");
    assert_eq!(json["anomalies"][0]["iqr_bounds"], serde_json::json!([10.0, 10.0]));
    assert!(json["anomalies"][0].get("ai_explanation").is_none());
    assert!(json["explanations"]["2024-01-11"]["price"]
        .as_str()
        .unwrap()
        .contains("price spike"));
}
