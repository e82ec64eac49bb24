//! Gap detection over a regular-grid series.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::duration::format_duration_ms;
use crate::reconstruct::ReconstructConfig;
use crate::series::{format_timestamp_ms, Series, TimestampError};

/// A maximal run of missing steps bracketed by two present observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start_ts_ms_utc: i64,
    pub steps: usize,
    pub duration_ms: i64,
}

impl Gap {
    /// Timestamp of the present observation closing the gap.
    pub fn end_ts_ms_utc_exclusive(&self) -> i64 {
        self.start_ts_ms_utc + self.duration_ms
    }

    pub fn tier(&self, cfg: &ReconstructConfig) -> GapTier {
        if self.duration_ms <= cfg.short_range_ms {
            GapTier::Short
        } else if self.duration_ms <= cfg.long_range_ms {
            GapTier::Medium
        } else {
            GapTier::Long
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GapTier {
    Short,
    Medium,
    Long,
}

impl GapTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReportRow {
    pub gap: Gap,
    pub tier: GapTier,
    pub filled_steps: usize,
}

/// Pre-fill gap list plus what the reconstructor did with each gap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub step_ms: i64,
    pub rows: Vec<GapReportRow>,
}

impl GapReport {
    pub fn gaps(&self) -> Vec<Gap> {
        self.rows.iter().map(|row| row.gap).collect()
    }

    pub fn total_missing_steps(&self) -> usize {
        self.rows.iter().map(|row| row.gap.steps).sum()
    }

    pub fn total_filled_steps(&self) -> usize {
        self.rows.iter().map(|row| row.filled_steps).sum()
    }

    /// Rows rendered as the `dt, duration, steps, tier, filled_steps` report table.
    pub fn to_table(&self) -> Result<Vec<[String; 5]>, TimestampError> {
        self.rows
            .iter()
            .map(|row| {
                Ok([
                    format_timestamp_ms(row.gap.start_ts_ms_utc)?,
                    format_duration_ms(row.gap.duration_ms),
                    row.gap.steps.to_string(),
                    row.tier.as_str().to_string(),
                    row.filled_steps.to_string(),
                ])
            })
            .collect()
    }
}

pub const GAP_REPORT_HEADERS: [&str; 5] = ["dt", "duration", "steps", "tier", "filled_steps"];

/// Runs of `None` between two present values, in ascending start order.
/// Leading and trailing missing runs are not gaps.
pub fn detect_gaps(series: &Series) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut last_present: Option<usize> = None;

    for (idx, row) in series.rows.iter().enumerate() {
        if row.y.is_none() {
            continue;
        }
        if let Some(prev) = last_present {
            let steps = idx - prev - 1;
            if steps > 0 {
                gaps.push(Gap {
                    start_ts_ms_utc: series.rows[prev + 1].ts_ms_utc,
                    steps,
                    duration_ms: steps as i64 * series.step_ms,
                });
            }
        }
        last_present = Some(idx);
    }

    info!(
        component = "gaps",
        event = "gaps.detected",
        step_ms = series.step_ms,
        grid_points = series.len(),
        gap_count = gaps.len(),
        missing_steps = gaps.iter().map(|gap| gap.steps).sum::<usize>()
    );

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesRow;

    fn grid(values: &[Option<f64>]) -> Series {
        Series {
            step_ms: 1_000,
            extra_columns: Vec::new(),
            rows: values
                .iter()
                .enumerate()
                .map(|(i, y)| SeriesRow {
                    ts_ms_utc: i as i64 * 1_000,
                    y: *y,
                    extra: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn finds_bracketed_runs_only() {
        let series = grid(&[
            None,
            Some(1.0),
            None,
            None,
            Some(2.0),
            Some(3.0),
            None,
            Some(4.0),
            None,
        ]);

        let gaps = detect_gaps(&series);
        assert_eq!(
            gaps,
            vec![
                Gap {
                    start_ts_ms_utc: 2_000,
                    steps: 2,
                    duration_ms: 2_000
                },
                Gap {
                    start_ts_ms_utc: 6_000,
                    steps: 1,
                    duration_ms: 1_000
                },
            ]
        );
        for gap in &gaps {
            assert!(gap.steps >= 1);
            assert_eq!(gap.duration_ms, gap.steps as i64 * series.step_ms);
        }
    }

    #[test]
    fn complete_series_has_no_gaps() {
        let series = grid(&[Some(1.0), Some(2.0), Some(3.0)]);
        assert!(detect_gaps(&series).is_empty());
        assert!(detect_gaps(&grid(&[])).is_empty());
        assert!(detect_gaps(&grid(&[None, None])).is_empty());
    }

    #[test]
    fn tier_boundaries_are_inclusive_on_the_upper_edge() {
        let cfg = ReconstructConfig {
            short_range_ms: 3_000,
            long_range_ms: 6_000,
        };
        let gap = |steps: usize| Gap {
            start_ts_ms_utc: 0,
            steps,
            duration_ms: steps as i64 * 1_000,
        };

        assert_eq!(gap(3).tier(&cfg), GapTier::Short);
        assert_eq!(gap(4).tier(&cfg), GapTier::Medium);
        assert_eq!(gap(6).tier(&cfg), GapTier::Medium);
        assert_eq!(gap(7).tier(&cfg), GapTier::Long);
    }

    #[test]
    fn report_table_renders_human_units() {
        let report = GapReport {
            step_ms: 3_600_000,
            rows: vec![GapReportRow {
                gap: Gap {
                    start_ts_ms_utc: 1_672_549_200_000, // 2023-01-01T05:00:00Z
                    steps: 2,
                    duration_ms: 7_200_000,
                },
                tier: GapTier::Short,
                filled_steps: 2,
            }],
        };

        let table = report.to_table().unwrap();
        assert_eq!(
            table[0],
            [
                "2023-01-01 05:00:00".to_string(),
                "2h".to_string(),
                "2".to_string(),
                "short".to_string(),
                "2".to_string(),
            ]
        );
        assert_eq!(report.total_missing_steps(), 2);
        assert_eq!(report.total_filled_steps(), 2);
    }
}
