//! Projection of raw spreadsheet rows into [`MetricRecord`]s.

use crate::models::{parse_date, parse_number, MetricRecord};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

/// Turns one raw row into a record. `None` drops the row.
pub trait RowMapper {
    fn map_row(&self, row: &[String]) -> Option<MetricRecord>;

    /// Leading rows that are headers rather than data.
    fn header_rows(&self) -> usize {
        0
    }
}

/// Skip the mapper's header rows and map the rest, keeping rows it accepts.
pub fn map_rows<M: RowMapper + ?Sized>(mapper: &M, rows: &[Vec<String>]) -> Vec<MetricRecord> {
    rows.iter()
        .skip(mapper.header_rows())
        .filter_map(|row| mapper.map_row(row))
        .collect()
}

/// Column layout of the campus energy sheet (date in column 1).
const SHEET_COLUMNS: [(&str, usize); 19] = [
    ("htc179", 0),
    ("htc232", 2),
    ("totalGED", 3),
    ("solarCapex", 4),
    ("solar", 5),
    ("solarOpex", 6),
    ("consumption", 7),
    ("solarPercentage", 8),
    ("c2kWh", 9),
    ("c2SolarPercentage", 10),
    ("rsPerKWh", 11),
    ("savingsFrom1MWpSolar", 12),
    ("savingsFromCapex", 13),
    ("totalSavings", 14),
    ("savings", 15),
    ("htc179Amount", 16),
    ("htc232Amount", 17),
    ("totalAmount", 18),
    ("price", 19),
];

const SHEET_DATE_COLUMN: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetRowMapper {
    pub header_rows: usize,
    /// Keep only rows dated in this year.
    pub year: Option<i32>,
}

impl Default for SheetRowMapper {
    fn default() -> Self {
        Self {
            header_rows: 4,
            year: None,
        }
    }
}

impl SheetRowMapper {
    pub fn for_year(year: i32) -> Self {
        Self {
            year: Some(year),
            ..Self::default()
        }
    }
}

fn cell(row: &[String], idx: usize) -> f64 {
    row.get(idx).map_or(f64::NAN, |s| parse_number(s))
}

impl RowMapper for SheetRowMapper {
    fn map_row(&self, row: &[String]) -> Option<MetricRecord> {
        let date = parse_date(row.get(SHEET_DATE_COLUMN)?)?;
        if self.year.is_some_and(|y| date.year() != y) {
            return None;
        }
        let mut rec = MetricRecord::new(date);
        for (name, idx) in SHEET_COLUMNS {
            rec.metrics.insert(name.to_string(), cell(row, idx));
        }
        let other = rec.value("consumption") - rec.value("solar");
        rec.metrics.insert("otherSources".to_string(), other);
        Some(rec)
    }

    fn header_rows(&self) -> usize {
        self.header_rows
    }
}
