//! Energy core: anomaly detection and pattern forecasting for campus energy metrics.
//! Pure functions over in-memory batches; no I/O.

mod anomaly;
mod error;
mod explain;
mod mapping;
mod models;
pub mod narrative;
pub mod stats;
mod trend;

pub use anomaly::{
    detect_anomalies, DetectionReport, DetectorConfig, ExplanationMap, DEFAULT_DETECTION_METRICS,
};
pub use error::{CoreError, Result};
pub use explain::explain;
pub use mapping::{map_rows, RowMapper, SheetRowMapper};
pub use models::{Anomaly, MetricMap, MetricRecord, PredictedRecord};
pub use narrative::{enrich, Narrative, NarrativeService};
pub use trend::{forecast, month_steps, project, trailing_pattern, ForecastConfig, DEFAULT_FORECAST_METRICS};
