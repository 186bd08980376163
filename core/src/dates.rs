use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::EngineError;
use crate::models::PriceRecord;

/// Human-facing date format used in every table and chart.
pub const DISPLAY_FORMAT: &str = "%d-%m-%Y";

/// Day-first forms first, so `01-02-2024` is the first of February.
const DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"];

/// Spreadsheet exports sometimes carry a midnight timestamp.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse a source date, preferring day-first interpretations.
pub fn parse_day_first(raw: &str) -> Result<NaiveDate, EngineError> {
    let s = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(EngineError::MalformedDate {
        value: raw.to_string(),
    })
}

/// Drill-down labels derived from a single date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DateHierarchy {
    pub year: i32,
    /// `YYYYQn`
    pub quarter: String,
    /// `YYYY-MM`
    pub month: String,
    /// `YYYY-Wnn`, Sunday-based week of year (weeks before the first Sunday are `W00`)
    pub week: String,
    /// `YYYY-MM-DD`
    pub day: String,
    /// `DD-MM-YYYY`
    pub display: String,
}

impl DateHierarchy {
    pub fn from_date(date: NaiveDate) -> Self {
        let year = date.year();
        let quarter = date.month0() / 3 + 1;
        Self {
            year,
            quarter: format!("{year}Q{quarter}"),
            month: date.format("%Y-%m").to_string(),
            week: date.format("%Y-W%U").to_string(),
            day: date.format("%Y-%m-%d").to_string(),
            display: date.format(DISPLAY_FORMAT).to_string(),
        }
    }
}

/// A price record together with its parsed date and derived labels.
///
/// `date` and `hierarchy` are both `None` when the raw date is malformed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRecord {
    pub record: PriceRecord,
    #[serde(skip)]
    pub date: Option<NaiveDate>,
    pub hierarchy: Option<DateHierarchy>,
}

impl AnnotatedRecord {
    pub fn annotate(record: &PriceRecord) -> (Self, Option<EngineError>) {
        match parse_day_first(&record.date) {
            Ok(date) => (
                Self {
                    record: record.clone(),
                    date: Some(date),
                    hierarchy: Some(DateHierarchy::from_date(date)),
                },
                None,
            ),
            Err(e) => (
                Self {
                    record: record.clone(),
                    date: None,
                    hierarchy: None,
                },
                Some(e),
            ),
        }
    }

    /// The `DD-MM-YYYY` form, or the raw source value when it did not parse.
    pub fn display_date(&self) -> &str {
        self.hierarchy
            .as_ref()
            .map_or(self.record.date.as_str(), |h| h.display.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub rows: Vec<AnnotatedRecord>,
    pub malformed: Vec<EngineError>,
}

impl Normalized {
    /// Raw values of the malformed dates, in source order.
    pub fn malformed_values(&self) -> Vec<String> {
        self.malformed
            .iter()
            .filter_map(|e| match e {
                EngineError::MalformedDate { value } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Annotate every record. Malformed rows are kept (without a hierarchy) and
/// collected as `MalformedDate` findings.
#[must_use]
pub fn normalize(records: &[PriceRecord]) -> Normalized {
    let mut out = Normalized {
        rows: Vec::with_capacity(records.len()),
        malformed: Vec::new(),
    };
    for record in records {
        let (row, err) = AnnotatedRecord::annotate(record);
        out.rows.push(row);
        if let Some(e) = err {
            out.malformed.push(e);
        }
    }
    if !out.malformed.is_empty() {
        tracing::warn!(
            count = out.malformed.len(),
            "price history rows with malformed dates excluded from date filters"
        );
    }
    out
}
