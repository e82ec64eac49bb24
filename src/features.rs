//! Cyclical, lagged and spectral features over a columnar feature table.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::duration::format_duration_ms;
use crate::series::Series;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;
pub const TARGET_COLUMN: &str = "y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

/// One DFT bin. `freq` is in cycles per step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumBin {
    pub freq: f64,
    pub abs: f64,
    pub peak: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("duplicate feature column: {0}")]
    DuplicateColumn(String),
    #[error("unknown feature column: {0}")]
    UnknownColumn(String),
    #[error("column {column} has {actual} values, table has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("column {column} has {count} missing values")]
    MissingValues { column: String, count: usize },
    #[error("insufficient data: need at least {needed} rows, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Columnar table: `ts_ms_utc[i]` is the timestamp of row `i` in every column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub ts_ms_utc: Vec<i64>,
    pub columns: Vec<FeatureColumn>,
    pub data: Vec<Vec<Option<f64>>>,
}

impl FeatureTable {
    /// `y` followed by the series' extra columns.
    pub fn from_series(series: &Series) -> Self {
        let mut table = Self {
            ts_ms_utc: series.rows.iter().map(|row| row.ts_ms_utc).collect(),
            columns: Vec::new(),
            data: Vec::new(),
        };
        table.columns.push(f64_column(TARGET_COLUMN));
        table.data.push(series.values());
        for (idx, name) in series.extra_columns.iter().enumerate() {
            table.columns.push(f64_column(name));
            table.data.push(
                series
                    .rows
                    .iter()
                    .map(|row| row.extra.get(idx).copied().flatten())
                    .collect(),
            );
        }
        table
    }

    pub fn len(&self) -> usize {
        self.ts_ms_utc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts_ms_utc.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.position(name).map(|idx| self.data[idx].as_slice())
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), FeatureError> {
        let name = name.into();
        if self.position(&name).is_some() {
            return Err(FeatureError::DuplicateColumn(name));
        }
        if values.len() != self.len() {
            return Err(FeatureError::LengthMismatch {
                column: name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.columns.push(f64_column(&name));
        self.data.push(values);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.position(name)?;
        self.columns.remove(idx);
        Some(self.data.remove(idx))
    }

    pub fn schema(&self) -> FeatureSchema {
        let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &self.columns);
        FeatureSchema {
            version: FEATURE_SCHEMA_VERSION,
            fingerprint,
            columns: self.columns.clone(),
        }
    }
}

/// Time of day, day of month, day of week (Monday = 0) and month, each as a
/// sin/cos pair.
pub fn add_datetime_features(table: &mut FeatureTable) -> Result<(), FeatureError> {
    let n = table.len();
    let mut encoded: [Vec<Option<f64>>; 8] = Default::default();
    for column in &mut encoded {
        column.reserve(n);
    }

    for ts_ms_utc in &table.ts_ms_utc {
        let dt = utc_datetime(*ts_ms_utc)?;
        let hours = dt.hour() as f64 + dt.minute() as f64 / 60.0 + dt.second() as f64 / 3600.0;
        let days_in_month = days_in_month(dt.year(), dt.month())
            .ok_or(FeatureError::InvalidTimestamp(*ts_ms_utc))?;
        let pairs = [
            cyclical_encode(hours, 24.0),
            cyclical_encode(dt.day() as f64, days_in_month as f64),
            cyclical_encode(dt.weekday().num_days_from_monday() as f64, 7.0),
            cyclical_encode(dt.month() as f64, 12.0),
        ];
        for (idx, (sin, cos)) in pairs.into_iter().enumerate() {
            encoded[idx * 2].push(Some(sin));
            encoded[idx * 2 + 1].push(Some(cos));
        }
    }

    let names = [
        "time_sin",
        "time_cos",
        "day_of_month_sin",
        "day_of_month_cos",
        "day_of_week_sin",
        "day_of_week_cos",
        "month_sin",
        "month_cos",
    ];
    for (name, values) in names.into_iter().zip(encoded) {
        table.push_column(name, values)?;
    }

    info!(
        component = "features",
        event = "features.datetime.added",
        rows = n
    );
    Ok(())
}

/// `step_ms = None`: `lag_{k}` is `y` shifted down by `k` rows.
/// `step_ms = Some(step)`: `lag_{k}_{step}` is `y` at `ts - k * step`, missing
/// when the table has no such timestamp.
pub fn add_lagged_features(
    table: &mut FeatureTable,
    lags: &[usize],
    step_ms: Option<i64>,
) -> Result<(), FeatureError> {
    let target = table
        .column(TARGET_COLUMN)
        .ok_or_else(|| FeatureError::UnknownColumn(TARGET_COLUMN.to_string()))?
        .to_vec();

    let by_ts: HashMap<i64, usize> = match step_ms {
        Some(_) => table
            .ts_ms_utc
            .iter()
            .enumerate()
            .map(|(idx, ts)| (*ts, idx))
            .collect(),
        None => HashMap::new(),
    };

    for &lag in lags {
        let (name, values) = match step_ms {
            None => {
                let values: Vec<Option<f64>> = (0..target.len())
                    .map(|idx| idx.checked_sub(lag).and_then(|src| target[src]))
                    .collect();
                (format!("lag_{lag}"), values)
            }
            Some(step) => {
                let shift = lag as i64 * step;
                let values: Vec<Option<f64>> = table
                    .ts_ms_utc
                    .iter()
                    .map(|ts| by_ts.get(&(ts - shift)).and_then(|src| target[*src]))
                    .collect();
                (format!("lag_{lag}_{}", format_duration_ms(step)), values)
            }
        };
        table.push_column(name, values)?;
    }

    info!(
        component = "features",
        event = "features.lagged.added",
        lags = ?lags,
        step_ms = ?step_ms
    );
    Ok(())
}

/// Adds `freq{i}_sin` / `freq{i}_cos` for the `top` strongest spectral peaks,
/// evaluated at the row index.
pub fn add_periodic_features(
    table: &mut FeatureTable,
    spectrum: &[SpectrumBin],
    top: usize,
) -> Result<(), FeatureError> {
    let mut peaks: Vec<SpectrumBin> = spectrum.iter().copied().filter(|bin| bin.peak).collect();
    peaks.sort_by(|a, b| b.abs.total_cmp(&a.abs));
    peaks.truncate(top);

    let mut seen = HashSet::new();
    let frequencies: Vec<f64> = peaks
        .into_iter()
        .map(|bin| bin.freq)
        .filter(|freq| seen.insert(freq.to_bits()))
        .collect();

    let n = table.len();
    for (i, freq) in frequencies.iter().enumerate() {
        let (sin, cos): (Vec<Option<f64>>, Vec<Option<f64>>) = (0..n)
            .map(|row| {
                let angle = 2.0 * PI * freq * row as f64;
                (Some(angle.sin()), Some(angle.cos()))
            })
            .unzip();
        table.push_column(format!("freq{}_sin", i + 1), sin)?;
        table.push_column(format!("freq{}_cos", i + 1), cos)?;
    }

    info!(
        component = "features",
        event = "features.periodic.added",
        requested = top,
        added = frequencies.len()
    );
    Ok(())
}

/// Mean-removed DFT amplitude for bins `1..=n/2`. A bin is a peak when it is
/// strictly larger than each neighbour it has.
pub fn compute_spectrum(values: &[Option<f64>]) -> Result<Vec<SpectrumBin>, FeatureError> {
    let missing = values.iter().filter(|value| value.is_none()).count();
    if missing > 0 {
        return Err(FeatureError::MissingValues {
            column: TARGET_COLUMN.to_string(),
            count: missing,
        });
    }
    let n = values.len();
    if n < 4 {
        return Err(FeatureError::InsufficientData { needed: 4, got: n });
    }

    let samples: Vec<f64> = values.iter().flatten().copied().collect();
    let mean = samples.iter().sum::<f64>() / n as f64;

    let amplitudes: Vec<f64> = (1..=n / 2)
        .map(|k| {
            let (re, im) = samples.iter().enumerate().fold((0.0, 0.0), |(re, im), (t, x)| {
                let angle = -2.0 * PI * k as f64 * t as f64 / n as f64;
                let centered = x - mean;
                (re + centered * angle.cos(), im + centered * angle.sin())
            });
            (re * re + im * im).sqrt()
        })
        .collect();

    let bins = amplitudes
        .iter()
        .enumerate()
        .map(|(idx, &abs)| {
            let left_ok = idx == 0 || abs > amplitudes[idx - 1];
            let right_ok = idx + 1 == amplitudes.len() || abs > amplitudes[idx + 1];
            SpectrumBin {
                freq: (idx + 1) as f64 / n as f64,
                abs,
                peak: left_ok && right_ok && amplitudes.len() > 1,
            }
        })
        .collect();

    Ok(bins)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn cyclical_encode(value: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * value / period;
    (angle.sin(), angle.cos())
}

fn days_in_month(year: i32, month: u32) -> Option<i64> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((next - first).num_days())
}

fn utc_datetime(ts_ms_utc: i64) -> Result<DateTime<Utc>, FeatureError> {
    Utc.timestamp_millis_opt(ts_ms_utc)
        .single()
        .ok_or(FeatureError::InvalidTimestamp(ts_ms_utc))
}

fn f64_column(name: &str) -> FeatureColumn {
    FeatureColumn {
        name: name.to_string(),
        dtype: FeatureDType::F64,
    }
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
