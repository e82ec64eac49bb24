//! Observation and regular-grid series types.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("unparseable timestamp '{0}'")]
    Unparseable(String),
    #[error("timestamp out of range: {0}")]
    OutOfRange(i64),
}

/// One raw input row. `y` and `extra` entries use `None` as the missing sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts_ms_utc: i64,
    pub y: Option<f64>,
    pub extra: Vec<Option<f64>>,
}

impl Observation {
    pub fn new(ts_ms_utc: i64, y: Option<f64>) -> Self {
        Self {
            ts_ms_utc,
            y,
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub ts_ms_utc: i64,
    pub y: Option<f64>,
    pub extra: Vec<Option<f64>>,
}

/// A series on a regular grid: row `i` sits at `start_ts_ms_utc() + i * step_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub step_ms: i64,
    pub extra_columns: Vec<String>,
    pub rows: Vec<SeriesRow>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn start_ts_ms_utc(&self) -> Option<i64> {
        self.rows.first().map(|row| row.ts_ms_utc)
    }

    pub fn end_ts_ms_utc(&self) -> Option<i64> {
        self.rows.last().map(|row| row.ts_ms_utc)
    }

    /// Grid position of `ts_ms_utc`, if it lies on the grid inside the series span.
    pub fn index_of(&self, ts_ms_utc: i64) -> Option<usize> {
        let start = self.start_ts_ms_utc()?;
        if self.step_ms <= 0 || ts_ms_utc < start {
            return None;
        }
        let offset = ts_ms_utc - start;
        if offset % self.step_ms != 0 {
            return None;
        }
        let idx = usize::try_from(offset / self.step_ms).ok()?;
        (idx < self.rows.len()).then_some(idx)
    }

    /// Present `y` at exactly `ts_ms_utc`.
    pub fn value_at(&self, ts_ms_utc: i64) -> Option<f64> {
        self.index_of(ts_ms_utc).and_then(|idx| self.rows[idx].y)
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.rows.iter().map(|row| row.y).collect()
    }

    pub fn present_count(&self) -> usize {
        self.rows.iter().filter(|row| row.y.is_some()).count()
    }

    pub fn missing_count(&self) -> usize {
        self.rows.len() - self.present_count()
    }
}

/// Accepts `"%Y-%m-%d %H:%M:%S"`, `"%Y-%m-%dT%H:%M:%S"` (optional fraction),
/// RFC 3339, or a bare date. Naive values are taken as UTC.
pub fn parse_timestamp_ms(raw: &str) -> Result<i64, TimestampError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    Err(TimestampError::Unparseable(trimmed.to_string()))
}

pub fn format_timestamp_ms(ts_ms_utc: i64) -> Result<String, TimestampError> {
    let dt = Utc
        .timestamp_millis_opt(ts_ms_utc)
        .single()
        .ok_or(TimestampError::OutOfRange(ts_ms_utc))?;
    if ts_ms_utc % 1_000 == 0 {
        Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string())
    } else {
        Ok(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
    }
}
