//! Tiered reconstruction of missing periodic data.
//!
//! - gap duration `<= short_range`: straight line between the bracketing values
//! - `short_range < duration <= long_range`: interpolation across the same time
//!   of day on neighbouring days
//! - `duration > long_range`: left missing
//!
//! Every fill reads the input series only, never values produced by another
//! fill, so the result does not depend on the order gaps are visited in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::duration::{parse_duration_ms, DurationParseError, DAY_MS, HOUR_MS};
use crate::gaps::{detect_gaps, Gap, GapReport, GapReportRow, GapTier};
use crate::series::Series;

pub const DEFAULT_RANGES: [&str; 2] = ["3h", "3d"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("invalid reconstruct config: {0}")]
    InvalidConfig(String),
    #[error("fewer than 2 day-aligned anchors around {ts_ms_utc} (found {anchors})")]
    AnchorNotFound { ts_ms_utc: i64, anchors: usize },
    #[error("no day-aligned anchor before {ts_ms_utc} ({anchors} after it)")]
    NoEarlierAnchor { ts_ms_utc: i64, anchors: usize },
    #[error("invalid range duration: {0}")]
    Duration(#[from] DurationParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructConfig {
    pub short_range_ms: i64,
    pub long_range_ms: i64,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            short_range_ms: 3 * HOUR_MS,
            long_range_ms: 3 * DAY_MS,
        }
    }
}

impl ReconstructConfig {
    /// `[short_range, long_range]` as duration strings, e.g. `["3h", "3d"]`.
    pub fn from_ranges(ranges: &[&str]) -> Result<Self, ReconstructError> {
        let [short, long] = ranges else {
            return Err(ReconstructError::InvalidConfig(format!(
                "expected 2 ranges (short, long), got {}",
                ranges.len()
            )));
        };
        let cfg = Self {
            short_range_ms: parse_duration_ms(short)?,
            long_range_ms: parse_duration_ms(long)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ReconstructError> {
        if self.short_range_ms <= 0 {
            return Err(ReconstructError::InvalidConfig(
                "short_range must be > 0".to_string(),
            ));
        }
        if self.short_range_ms >= self.long_range_ms {
            return Err(ReconstructError::InvalidConfig(format!(
                "short_range ({}ms) must be less than long_range ({}ms)",
                self.short_range_ms, self.long_range_ms
            )));
        }
        Ok(())
    }
}

/// Fills every short and medium gap of `series`. Returns the filled copy and
/// the gap list as detected before any filling.
pub fn reconstruct(
    series: &Series,
    cfg: &ReconstructConfig,
) -> Result<(Series, GapReport), ReconstructError> {
    cfg.validate()?;
    if series.step_ms <= 0 {
        return Err(ReconstructError::InvalidConfig(format!(
            "series step must be > 0, got {}ms",
            series.step_ms
        )));
    }

    let gaps = detect_gaps(series);
    let mut out = series.clone();
    let mut report = GapReport {
        step_ms: series.step_ms,
        rows: Vec::with_capacity(gaps.len()),
    };

    for gap in gaps {
        let tier = gap.tier(cfg);
        let filled_steps = fill_gap(series, &mut out, &gap, cfg);
        debug!(
            component = "reconstruct",
            event = "reconstruct.gap.filled",
            start_ts_ms_utc = gap.start_ts_ms_utc,
            steps = gap.steps,
            duration_ms = gap.duration_ms,
            tier = tier.as_str(),
            filled_steps = filled_steps
        );
        report.rows.push(GapReportRow {
            gap,
            tier,
            filled_steps,
        });
    }

    info!(
        component = "reconstruct",
        event = "reconstruct.finish",
        step_ms = series.step_ms,
        short_range_ms = cfg.short_range_ms,
        long_range_ms = cfg.long_range_ms,
        gap_count = report.rows.len(),
        missing_steps = report.total_missing_steps(),
        filled_steps = report.total_filled_steps()
    );

    Ok((out, report))
}

/// Applies the tier policy for one gap. Values are read from `original` and
/// written into `out` only where `out` is still missing. Returns the number of
/// steps filled.
pub fn fill_gap(
    original: &Series,
    out: &mut Series,
    gap: &Gap,
    cfg: &ReconstructConfig,
) -> usize {
    let fills: Vec<(i64, f64)> = match gap.tier(cfg) {
        GapTier::Short => interpolate_linear(original, gap),
        GapTier::Medium => {
            interpolate_day_anchored(original, gap.start_ts_ms_utc, gap.steps, original.step_ms)
                .into_iter()
                .collect()
        }
        GapTier::Long => Vec::new(),
    };

    let mut filled = 0;
    for (ts_ms_utc, value) in fills {
        let Some(idx) = out.index_of(ts_ms_utc) else {
            continue;
        };
        let slot = &mut out.rows[idx].y;
        if slot.is_none() {
            *slot = Some(value);
            filled += 1;
        }
    }
    filled
}

/// Straight line between the present values just before and just after `gap`.
pub fn interpolate_linear(series: &Series, gap: &Gap) -> Vec<(i64, f64)> {
    let step_ms = series.step_ms;
    let left = series.value_at(gap.start_ts_ms_utc - step_ms);
    let right = series.value_at(gap.end_ts_ms_utc_exclusive());
    let (Some(left), Some(right)) = (left, right) else {
        return Vec::new();
    };

    let span = (gap.steps + 1) as f64;
    (0..gap.steps)
        .map(|i| {
            let ts_ms_utc = gap.start_ts_ms_utc + i as i64 * step_ms;
            let frac = (i + 1) as f64 / span;
            (ts_ms_utc, left + (right - left) * frac)
        })
        .collect()
}

/// Day-anchored fill for each of the `steps` missing points starting at
/// `start_ts_ms_utc`. Steps without enough anchors are left out of the map.
pub fn interpolate_day_anchored(
    series: &Series,
    start_ts_ms_utc: i64,
    steps: usize,
    step_ms: i64,
) -> BTreeMap<i64, f64> {
    let mut out = BTreeMap::new();
    for i in 0..steps {
        let ts_ms_utc = start_ts_ms_utc + i as i64 * step_ms;
        let elapsed_ms = i as i64 * step_ms;
        let remaining_ms = (steps - i) as i64 * step_ms;
        match day_anchored_value(series, ts_ms_utc, elapsed_ms, remaining_ms) {
            Ok(value) => {
                out.insert(ts_ms_utc, value);
            }
            Err(err) => {
                debug!(
                    component = "reconstruct",
                    event = "reconstruct.anchor_missing",
                    ts_ms_utc = ts_ms_utc,
                    error = %err
                );
            }
        }
    }
    out
}

/// Value for `ts_ms_utc` from present values at `ts ± k days`. The window
/// reaches back `ceil(elapsed / 1d) + 1` days and forward
/// `ceil(remaining / 1d) + 1` days.
///
/// Interpolation runs forward only: a step with no anchor before it stays
/// missing, and a step past the last anchor carries that anchor's value.
/// The slot at `ts_ms_utc` itself is never read.
pub fn day_anchored_value(
    series: &Series,
    ts_ms_utc: i64,
    elapsed_ms: i64,
    remaining_ms: i64,
) -> Result<f64, ReconstructError> {
    let back_days = ceil_days(elapsed_ms) + 1;
    let forward_days = ceil_days(remaining_ms) + 1;

    let mut anchors = 0usize;
    let mut before: Option<(i64, f64)> = None;
    let mut after: Option<(i64, f64)> = None;

    for k in (-back_days..=forward_days).filter(|k| *k != 0) {
        let Some(value) = series.value_at(ts_ms_utc + k * DAY_MS) else {
            continue;
        };
        anchors += 1;
        if k < 0 {
            before = Some((k, value));
        } else if after.is_none() {
            after = Some((k, value));
        }
    }

    if anchors < 2 {
        return Err(ReconstructError::AnchorNotFound { ts_ms_utc, anchors });
    }

    match (before, after) {
        (Some((k_before, v_before)), Some((k_after, v_after))) => {
            let frac = -k_before as f64 / (k_after - k_before) as f64;
            Ok(v_before + (v_after - v_before) * frac)
        }
        (Some((_, value)), None) => Ok(value),
        (None, _) => Err(ReconstructError::NoEarlierAnchor { ts_ms_utc, anchors }),
    }
}

fn ceil_days(duration_ms: i64) -> i64 {
    if duration_ms <= 0 {
        0
    } else {
        (duration_ms + DAY_MS - 1) / DAY_MS
    }
}
