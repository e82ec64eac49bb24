use std::path::{Path, PathBuf};

use serde_json::json;
use tsprep::{
    fill_missing, format_duration_ms, format_timestamp_ms, init_logging, log_app_start,
    log_gap_summary, log_input_selected, logging_config_from_env, parse_timestamp_ms,
    prep_config_from_env, Observation, Series, SeriesStore, StoreConfig, GAP_REPORT_HEADERS,
};

const COMPONENT: &str = "series_gap_audit";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(COMPONENT, &logging);

    let input_path = std::env::var("TSPREP_INPUT_CSV")
        .map(PathBuf::from)
        .map_err(|_| "TSPREP_INPUT_CSV must point at a dt,y[,extra...] CSV file")?;
    let output_path = std::env::var("TSPREP_OUTPUT_CSV").ok().map(PathBuf::from);
    let store_path = std::env::var("TSPREP_STORE_PATH").ok().map(PathBuf::from);
    let store_table =
        std::env::var("TSPREP_STORE_TABLE").unwrap_or_else(|_| "series_filled".to_string());

    let cfg = prep_config_from_env()?;
    log_input_selected(COMPONENT, "csv", &input_path);

    let (extra_columns, observations) = read_input_csv(&input_path)?;
    let (filled, report) = fill_missing(&observations, &extra_columns, &cfg)?;
    log_gap_summary(COMPONENT, &report);

    for row in report.to_table()? {
        let line: serde_json::Map<String, serde_json::Value> = GAP_REPORT_HEADERS
            .iter()
            .zip(row)
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        println!("{}", serde_json::Value::Object(line));
    }

    println!(
        "{}",
        json!({
            "summary": true,
            "input_rows": observations.len(),
            "step": format_duration_ms(report.step_ms),
            "grid_points": filled.len(),
            "gaps": report.rows.len(),
            "missing_steps": report.total_missing_steps(),
            "filled_steps": report.total_filled_steps(),
            "still_missing": filled.missing_count(),
        })
    );

    if let Some(path) = output_path {
        write_output_csv(&path, &filled)?;
    }

    if let Some(path) = store_path {
        let mut store = SeriesStore::open(&StoreConfig { path })?;
        store.append_series(&filled, &store_table)?;
        store.append_gap_report(&report, &format!("{store_table}_gaps"))?;
    }

    Ok(())
}

fn read_input_csv(
    path: &Path,
) -> Result<(Vec<String>, Vec<Observation>), Box<dyn std::error::Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 || &headers[0] != "dt" || &headers[1] != "y" {
        return Err(format!(
            "{} must start with a `dt,y` header, got `{}`",
            path.display(),
            headers.iter().collect::<Vec<_>>().join(",")
        )
        .into());
    }
    let extra_columns: Vec<String> = headers.iter().skip(2).map(str::to_string).collect();

    let mut observations = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let ts_ms_utc = parse_timestamp_ms(record.get(0).unwrap_or_default())?;
        let mut values = Vec::with_capacity(record.len().saturating_sub(1));
        for (idx, header) in headers.iter().enumerate().skip(1) {
            let raw = record.get(idx).unwrap_or_default();
            values.push(parse_cell(raw).map_err(|_| {
                format!("row {}: column {header} is not numeric: '{raw}'", line + 2)
            })?);
        }
        let mut values = values.into_iter();
        let y = values.next().flatten();
        observations.push(Observation {
            ts_ms_utc,
            y,
            extra: values.collect(),
        });
    }

    Ok((extra_columns, observations))
}

fn parse_cell(raw: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let value: f64 = raw.parse()?;
    Ok(value.is_finite().then_some(value))
}

fn write_output_csv(path: &Path, series: &Series) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["dt".to_string(), "y".to_string()];
    header.extend(series.extra_columns.iter().cloned());
    writer.write_record(&header)?;

    for row in &series.rows {
        let mut record = vec![format_timestamp_ms(row.ts_ms_utc)?, format_cell(row.y)];
        record.extend(row.extra.iter().map(|value| format_cell(*value)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
