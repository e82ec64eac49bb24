//! Irregular observations onto a uniform grid with explicit gaps.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, info};

use crate::duration::FreqSpec;
use crate::series::{Observation, Series, SeriesRow};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("insufficient data: need at least {needed} distinct timestamps, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("invalid resample config: {0}")]
    InvalidConfig(String),
    #[error("grid of {points} points exceeds the limit of {limit}")]
    GridTooLarge { points: i64, limit: usize },
}

/// Upper bound on materialized grid rows.
pub const MAX_GRID_POINTS: usize = 10_000_000;

/// Merges observations sharing a timestamp by averaging present values per
/// column. Output is sorted by timestamp.
pub fn dedup_observations(observations: &[Observation]) -> Vec<Observation> {
    let extra_width = observations
        .iter()
        .map(|obs| obs.extra.len())
        .max()
        .unwrap_or(0);

    let mut sums: BTreeMap<i64, (ColumnMean, Vec<ColumnMean>)> = BTreeMap::new();
    for obs in observations {
        let entry = sums
            .entry(obs.ts_ms_utc)
            .or_insert_with(|| (ColumnMean::default(), vec![ColumnMean::default(); extra_width]));
        entry.0.push(obs.y);
        for (slot, value) in entry.1.iter_mut().zip(obs.extra.iter()) {
            slot.push(*value);
        }
    }

    sums.into_iter()
        .map(|(ts_ms_utc, (y, extra))| Observation {
            ts_ms_utc,
            y: y.mean(),
            extra: extra.iter().map(ColumnMean::mean).collect(),
        })
        .collect()
}

/// Most frequent delta between consecutive distinct timestamps that carry a
/// present `y`. Ties go to the smaller delta.
pub fn infer_step_ms(observations: &[Observation]) -> Result<i64, ResampleError> {
    let deduped = dedup_observations(observations);
    let present: Vec<i64> = deduped
        .iter()
        .filter(|obs| obs.y.is_some())
        .map(|obs| obs.ts_ms_utc)
        .collect();

    if present.len() < 2 {
        return Err(ResampleError::InsufficientData {
            needed: 2,
            got: present.len(),
        });
    }

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in present.windows(2) {
        *counts.entry(pair[1] - pair[0]).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|(delta_a, count_a), (delta_b, count_b)| {
            count_a.cmp(count_b).then_with(|| delta_b.cmp(delta_a))
        })
        .map(|(delta, _)| delta)
        .ok_or(ResampleError::InsufficientData {
            needed: 2,
            got: present.len(),
        })
}

/// Builds the regular grid `[min_ts, max_ts]` at the requested (or inferred)
/// step and left-joins the deduplicated observations onto it.
pub fn resample(
    observations: &[Observation],
    freq: FreqSpec,
    extra_columns: &[String],
) -> Result<(Series, i64), ResampleError> {
    if observations.is_empty() {
        return Err(ResampleError::InsufficientData { needed: 1, got: 0 });
    }

    let step_ms = match freq {
        FreqSpec::Auto => infer_step_ms(observations)?,
        FreqSpec::Fixed(step_ms) if step_ms > 0 => step_ms,
        FreqSpec::Fixed(step_ms) => {
            return Err(ResampleError::InvalidConfig(format!(
                "frequency must be positive, got {step_ms}ms"
            )))
        }
    };

    let deduped = dedup_observations(observations);
    let min_ts = deduped[0].ts_ms_utc;
    let max_ts = deduped[deduped.len() - 1].ts_ms_utc;
    let extra_width = extra_columns.len();

    let point_count = (max_ts - min_ts) / step_ms + 1;
    if point_count > MAX_GRID_POINTS as i64 {
        return Err(ResampleError::GridTooLarge {
            points: point_count,
            limit: MAX_GRID_POINTS,
        });
    }
    let point_count = point_count as usize;
    let mut rows: Vec<SeriesRow> = (0..point_count)
        .map(|i| SeriesRow {
            ts_ms_utc: min_ts + i as i64 * step_ms,
            y: None,
            extra: vec![None; extra_width],
        })
        .collect();

    let mut off_grid = 0u64;
    for obs in &deduped {
        let offset = obs.ts_ms_utc - min_ts;
        if offset % step_ms != 0 {
            off_grid += 1;
            continue;
        }
        let idx = (offset / step_ms) as usize;
        if let Some(row) = rows.get_mut(idx) {
            row.y = obs.y;
            for (slot, value) in row.extra.iter_mut().zip(obs.extra.iter()) {
                *slot = *value;
            }
        }
    }

    if off_grid > 0 {
        debug!(
            component = "resample",
            event = "resample.off_grid_dropped",
            step_ms = step_ms,
            dropped = off_grid
        );
    }

    let series = Series {
        step_ms,
        extra_columns: extra_columns.to_vec(),
        rows,
    };

    info!(
        component = "resample",
        event = "resample.finish",
        freq = %freq,
        step_ms = step_ms,
        input_points = observations.len(),
        distinct_points = deduped.len(),
        grid_points = series.len(),
        missing_points = series.missing_count()
    );

    Ok((series, step_ms))
}

#[derive(Debug, Clone, Copy, Default)]
struct ColumnMean {
    sum: f64,
    count: u32,
}

impl ColumnMean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::HOUR_MS;

    fn obs(ts: i64, y: Option<f64>) -> Observation {
        Observation::new(ts, y)
    }

    #[test]
    fn stray_timestamp_cannot_blow_up_the_grid() {
        let input = vec![
            obs(0, Some(1.0)),
            obs(1_000, Some(2.0)),
            obs(2_000, Some(3.0)),
            obs(100 * 365 * 24 * HOUR_MS, Some(4.0)),
        ];

        let err = resample(&input, FreqSpec::Auto, &[]).unwrap_err();
        assert!(matches!(
            err,
            ResampleError::GridTooLarge { limit, .. } if limit == MAX_GRID_POINTS
        ));

        let (series, _) = resample(&input[..3], FreqSpec::Fixed(1_000), &[]).unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn duplicates_are_averaged_per_column() {
        let input = vec![
            Observation {
                ts_ms_utc: 0,
                y: Some(1.0),
                extra: vec![Some(10.0)],
            },
            Observation {
                ts_ms_utc: 0,
                y: Some(3.0),
                extra: vec![None],
            },
            Observation {
                ts_ms_utc: 5,
                y: None,
                extra: vec![Some(7.0)],
            },
        ];

        let deduped = dedup_observations(&input);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].y, Some(2.0));
        assert_eq!(deduped[0].extra, vec![Some(10.0)]);
        assert_eq!(deduped[1].y, None);
        assert_eq!(deduped[1].extra, vec![Some(7.0)]);
    }

    #[test]
    fn infers_mode_of_present_deltas() {
        let input = vec![
            obs(0, Some(1.0)),
            obs(HOUR_MS, Some(1.0)),
            obs(2 * HOUR_MS, Some(1.0)),
            obs(5 * HOUR_MS, Some(1.0)),
            obs(6 * HOUR_MS, Some(1.0)),
        ];
        assert_eq!(infer_step_ms(&input).unwrap(), HOUR_MS);
    }

    #[test]
    fn inference_tie_prefers_smaller_delta() {
        let input = vec![obs(0, Some(1.0)), obs(10, Some(1.0)), obs(30, Some(1.0))];
        assert_eq!(infer_step_ms(&input).unwrap(), 10);
    }

    #[test]
    fn inference_needs_two_present_timestamps() {
        let input = vec![obs(0, Some(1.0)), obs(0, Some(2.0)), obs(10, None)];
        assert_eq!(
            infer_step_ms(&input),
            Err(ResampleError::InsufficientData { needed: 2, got: 1 })
        );
    }

    #[test]
    fn grid_has_explicit_missing_rows() {
        let input = vec![obs(30, Some(3.0)), obs(0, Some(0.0)), obs(10, Some(1.0))];
        let (series, step) = resample(&input, FreqSpec::Fixed(10), &[]).unwrap();

        assert_eq!(step, 10);
        assert_eq!(series.len(), 4);
        assert_eq!(
            series.values(),
            vec![Some(0.0), Some(1.0), None, Some(3.0)]
        );
        assert_eq!(series.rows[2].ts_ms_utc, 20);
    }

    #[test]
    fn off_grid_observations_are_dropped() {
        let input = vec![obs(0, Some(0.0)), obs(15, Some(9.0)), obs(20, Some(2.0))];
        let (series, _) = resample(&input, FreqSpec::Fixed(10), &[]).unwrap();
        assert_eq!(series.values(), vec![Some(0.0), None, Some(2.0)]);
    }

    #[test]
    fn rejects_non_positive_step_and_empty_input() {
        let input = vec![obs(0, Some(0.0))];
        assert!(matches!(
            resample(&input, FreqSpec::Fixed(0), &[]),
            Err(ResampleError::InvalidConfig(_))
        ));
        assert_eq!(
            resample(&[], FreqSpec::Auto, &[]),
            Err(ResampleError::InsufficientData { needed: 1, got: 0 })
        );
    }
}
