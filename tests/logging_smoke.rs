use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;
use tsprep::{
    fill_missing, log_app_start, log_gap_summary, log_input_selected, FreqSpec, LoggingConfig,
    Observation, PrepConfig, ReconstructConfig, SeriesStore, HOUR_MS,
};

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn hourly(hours: usize, missing: &[usize]) -> Vec<Observation> {
    (0..=hours)
        .filter(|h| !missing.contains(h))
        .map(|h| Observation::new(h as i64 * HOUR_MS, Some(h as f64)))
        .collect()
}

#[test]
fn fill_missing_emits_stage_events() {
    let observations = hourly(48, &[5, 6]);
    let logs = capture_logs(Level::INFO, || {
        let (_, report) =
            fill_missing(&observations, &[], &PrepConfig::default()).expect("fill succeeds");
        assert_eq!(report.total_filled_steps(), 2);
    });

    assert!(logs.contains("\"event\":\"resample.finish\""));
    assert!(logs.contains("\"event\":\"gaps.detected\""));
    assert!(logs.contains("\"event\":\"reconstruct.finish\""));
    assert!(logs.contains("\"event\":\"pipeline.fill_missing.finish\""));
    assert!(!logs.contains("\"event\":\"reconstruct.gap.filled\""));
}

#[test]
fn per_gap_and_anchor_events_are_debug_only() {
    // A 10h gap on a two-day series has at most one same-hour anchor.
    let missing: Vec<usize> = (30..40).collect();
    let observations = hourly(48, &missing);
    let cfg = PrepConfig {
        freq: FreqSpec::Fixed(HOUR_MS),
        reconstruct: ReconstructConfig::default(),
    };

    let logs = capture_logs(Level::DEBUG, || {
        let (filled, report) = fill_missing(&observations, &[], &cfg).expect("fill succeeds");
        assert_eq!(report.rows[0].filled_steps, 0);
        assert_eq!(filled.missing_count(), 10);
    });

    assert!(logs.contains("\"event\":\"reconstruct.gap.filled\""));
    assert!(logs.contains("\"event\":\"reconstruct.anchor_missing\""));
}

#[test]
fn app_lifecycle_helpers_emit_baseline_events() {
    let observations = hourly(10, &[3]);
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start("series_gap_audit", &cfg);
        log_input_selected("series_gap_audit", "csv", Path::new("data/load.csv"));
        let (_, report) =
            fill_missing(&observations, &[], &PrepConfig::default()).expect("fill succeeds");
        log_gap_summary("series_gap_audit", &report);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"input.selected\""));
    assert!(logs.contains("\"event\":\"gaps.summary\""));
    assert!(logs.contains("\"component\":\"series_gap_audit\""));
}

#[test]
fn store_reads_emit_finish_event() {
    let conn = rusqlite::Connection::open_in_memory().expect("in-memory sqlite");
    conn.execute_batch(
        "
        CREATE TABLE t (dt TEXT, y REAL);
        INSERT INTO t VALUES ('2023-01-01', 1.0);
        ",
    )
    .expect("seed");
    let store = SeriesStore::from_connection(conn);

    let logs = capture_logs(Level::INFO, || {
        let table = store.read_table("t").expect("read table");
        assert_eq!(table.observations.len(), 1);
    });

    assert!(logs.contains("\"event\":\"store.read.finish\""));
}
