//! SQLite table adapter: one read per load, one transactional append per write.

use std::path::{Path, PathBuf};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::duration::format_duration_ms;
use crate::gaps::GapReport;
use crate::series::{
    format_timestamp_ms, parse_timestamp_ms, Observation, Series, TimestampError,
};

pub const DT_COLUMN: &str = "dt";
pub const Y_COLUMN: &str = "y";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("table {table} has no column {column}")]
    MissingColumn { table: String, column: String },
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("column {column} holds a non-numeric value '{value}'")]
    NonNumeric { column: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tsprep.sqlite"),
        }
    }
}

/// Observations read from a table, plus the names of the pass-through columns
/// in the order they appear in each observation's `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTable {
    pub extra_columns: Vec<String>,
    pub observations: Vec<Observation>,
}

pub struct SeriesStore {
    conn: Connection,
}

impl SeriesStore {
    pub fn open(cfg: &StoreConfig) -> Result<Self, StoreError> {
        Self::open_path(&cfg.path)
    }

    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn read_table(&self, table_name: &str) -> Result<StoredTable, StoreError> {
        validate_identifier(table_name)?;
        let columns = self.table_columns(table_name)?;
        for required in [DT_COLUMN, Y_COLUMN] {
            if !columns.iter().any(|c| c == required) {
                return Err(StoreError::MissingColumn {
                    table: table_name.to_string(),
                    column: required.to_string(),
                });
            }
        }
        let extra_columns: Vec<String> = columns
            .into_iter()
            .filter(|c| c != DT_COLUMN && c != Y_COLUMN)
            .collect();
        for column in &extra_columns {
            validate_identifier(column)?;
        }

        let mut select = format!("SELECT {DT_COLUMN}, {Y_COLUMN}");
        for column in &extra_columns {
            select.push_str(", ");
            select.push_str(column);
        }
        select.push_str(&format!(" FROM {table_name}"));

        let mut stmt = self.conn.prepare(&select)?;
        let mut rows = stmt.query([])?;
        let mut observations = Vec::new();
        while let Some(row) = rows.next()? {
            let ts_ms_utc = timestamp_value(row.get_ref(0)?)?;
            let y = numeric_value(Y_COLUMN, row.get_ref(1)?)?;
            let mut extra = Vec::with_capacity(extra_columns.len());
            for (offset, column) in extra_columns.iter().enumerate() {
                extra.push(numeric_value(column, row.get_ref(offset + 2)?)?);
            }
            observations.push(Observation {
                ts_ms_utc,
                y,
                extra,
            });
        }

        info!(
            component = "store",
            event = "store.read.finish",
            table = table_name,
            rows = observations.len(),
            extra_columns = extra_columns.len()
        );

        Ok(StoredTable {
            extra_columns,
            observations,
        })
    }

    /// Appends every row of `series`, creating the table when absent.
    pub fn append_series(&mut self, series: &Series, table_name: &str) -> Result<(), StoreError> {
        validate_identifier(table_name)?;
        for column in &series.extra_columns {
            validate_identifier(column)?;
        }

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table_name} ({DT_COLUMN} TEXT NOT NULL, {Y_COLUMN} REAL"
        );
        for column in &series.extra_columns {
            ddl.push_str(&format!(", {column} REAL"));
        }
        ddl.push_str(");");

        let column_list = std::iter::once(DT_COLUMN.to_string())
            .chain(std::iter::once(Y_COLUMN.to_string()))
            .chain(series.extra_columns.iter().cloned())
            .collect::<Vec<_>>();
        let placeholders = (1..=column_list.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {table_name} ({}) VALUES ({placeholders})",
            column_list.join(", ")
        );

        let tx = self.conn.transaction()?;
        tx.execute_batch(&ddl)?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in &series.rows {
                let dt = format_timestamp_ms(row.ts_ms_utc)?;
                let mut values: Vec<Value> = Vec::with_capacity(column_list.len());
                values.push(dt.into());
                values.push(row.y.into());
                for idx in 0..series.extra_columns.len() {
                    values.push(row.extra.get(idx).copied().flatten().into());
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.append.finish",
            table = table_name,
            rows = series.len()
        );
        Ok(())
    }

    /// Appends the gap report table (`dt`, `duration`, `duration_ms`, `steps`,
    /// `tier`, `filled_steps`).
    pub fn append_gap_report(
        &mut self,
        report: &GapReport,
        table_name: &str,
    ) -> Result<(), StoreError> {
        validate_identifier(table_name)?;

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {table_name} (
                dt TEXT NOT NULL,
                duration TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                steps INTEGER NOT NULL,
                tier TEXT NOT NULL,
                filled_steps INTEGER NOT NULL
            );
            "
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "
                INSERT INTO {table_name} (dt, duration, duration_ms, steps, tier, filled_steps)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "
            ))?;
            for row in &report.rows {
                stmt.execute(params![
                    format_timestamp_ms(row.gap.start_ts_ms_utc)?,
                    format_duration_ms(row.gap.duration_ms),
                    row.gap.duration_ms,
                    row.gap.steps as i64,
                    row.tier.as_str(),
                    row.filled_steps as i64,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.append_gaps.finish",
            table = table_name,
            rows = report.rows.len()
        );
        Ok(())
    }

    fn table_columns(&self, table_name: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({table_name})"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(StoreError::MissingColumn {
                table: table_name.to_string(),
                column: DT_COLUMN.to_string(),
            });
        }
        Ok(columns)
    }
}

pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn timestamp_value(value: ValueRef<'_>) -> Result<i64, StoreError> {
    match value {
        ValueRef::Integer(ts_ms_utc) => Ok(ts_ms_utc),
        ValueRef::Real(ts_ms_utc) => Ok(ts_ms_utc.round() as i64),
        ValueRef::Text(raw) => Ok(parse_timestamp_ms(&String::from_utf8_lossy(raw))?),
        ValueRef::Null => Err(TimestampError::Unparseable("NULL".to_string()).into()),
        ValueRef::Blob(_) => Err(TimestampError::Unparseable("<blob>".to_string()).into()),
    }
}

fn numeric_value(column: &str, value: ValueRef<'_>) -> Result<Option<f64>, StoreError> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(v) => Ok(Some(v as f64)),
        ValueRef::Real(v) if v.is_nan() => Ok(None),
        ValueRef::Real(v) => Ok(Some(v)),
        ValueRef::Text(raw) => {
            let text = String::from_utf8_lossy(raw);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| StoreError::NonNumeric {
                    column: column.to_string(),
                    value: trimmed.to_string(),
                })
        }
        ValueRef::Blob(_) => Err(StoreError::NonNumeric {
            column: column.to_string(),
            value: "<blob>".to_string(),
        }),
    }
}
