//! Resample + reconstruct in one call, and its env-driven configuration.

use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::duration::{DurationParseError, FreqSpec};
use crate::gaps::GapReport;
use crate::reconstruct::{reconstruct, ReconstructConfig, ReconstructError};
use crate::resample::{resample, ResampleError};
use crate::series::{Observation, Series};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resample(#[from] ResampleError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("invalid {var}: {source}")]
    Env {
        var: &'static str,
        #[source]
        source: ReconstructError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    pub freq: FreqSpec,
    pub reconstruct: ReconstructConfig,
}

/// Reads `TSPREP_FREQ` (`auto` or a duration) and `TSPREP_RANGES`
/// (`short,long`, e.g. `3h,3d`). Unset or blank variables keep defaults;
/// unparsable ones are errors.
pub fn prep_config_from_env() -> Result<PrepConfig, PipelineError> {
    let mut config = PrepConfig::default();

    if let Ok(raw) = env::var("TSPREP_FREQ") {
        if !raw.trim().is_empty() {
            config.freq = raw
                .parse()
                .map_err(|err: DurationParseError| PipelineError::Env {
                    var: "TSPREP_FREQ",
                    source: err.into(),
                })?;
        }
    }

    if let Ok(raw) = env::var("TSPREP_RANGES") {
        if !raw.trim().is_empty() {
            let ranges: Vec<&str> = raw.split(',').map(str::trim).collect();
            config.reconstruct =
                ReconstructConfig::from_ranges(&ranges).map_err(|source| PipelineError::Env {
                    var: "TSPREP_RANGES",
                    source,
                })?;
        }
    }

    Ok(config)
}

/// Builds the regular grid from raw observations and reconstructs its gaps.
/// The gap report describes the grid as it was before filling.
pub fn fill_missing(
    observations: &[Observation],
    extra_columns: &[String],
    cfg: &PrepConfig,
) -> Result<(Series, GapReport), PipelineError> {
    cfg.reconstruct.validate()?;
    let (series, step_ms) = resample(observations, cfg.freq, extra_columns)?;
    let (filled, report) = reconstruct(&series, &cfg.reconstruct)?;

    info!(
        component = "pipeline",
        event = "pipeline.fill_missing.finish",
        step_ms = step_ms,
        grid_points = filled.len(),
        missing_before = series.missing_count(),
        missing_after = filled.missing_count()
    );

    Ok((filled, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{DAY_MS, HOUR_MS, MINUTE_MS};
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_env_vars(
            &[("TSPREP_FREQ", None), ("TSPREP_RANGES", None)],
            prep_config_from_env,
        )
        .unwrap();

        assert_eq!(cfg, PrepConfig::default());
        assert_eq!(cfg.freq, FreqSpec::Auto);
        assert_eq!(cfg.reconstruct.short_range_ms, 3 * HOUR_MS);
        assert_eq!(cfg.reconstruct.long_range_ms, 3 * DAY_MS);
    }

    #[test]
    fn parses_freq_and_ranges_from_env() {
        let cfg = with_env_vars(
            &[
                ("TSPREP_FREQ", Some("15min")),
                ("TSPREP_RANGES", Some("1h, 2d")),
            ],
            prep_config_from_env,
        )
        .unwrap();

        assert_eq!(cfg.freq, FreqSpec::Fixed(15 * MINUTE_MS));
        assert_eq!(cfg.reconstruct.short_range_ms, HOUR_MS);
        assert_eq!(cfg.reconstruct.long_range_ms, 2 * DAY_MS);
    }

    #[test]
    fn invalid_env_values_are_errors() {
        let err = with_env_vars(
            &[("TSPREP_FREQ", Some("often")), ("TSPREP_RANGES", None)],
            prep_config_from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Env {
                var: "TSPREP_FREQ",
                ..
            }
        ));

        let err = with_env_vars(
            &[("TSPREP_FREQ", None), ("TSPREP_RANGES", Some("3d,3h"))],
            prep_config_from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Env {
                var: "TSPREP_RANGES",
                ..
            }
        ));
    }

    #[test]
    fn inverted_ranges_fail_before_resampling() {
        let cfg = PrepConfig {
            freq: FreqSpec::Auto,
            reconstruct: ReconstructConfig {
                short_range_ms: DAY_MS,
                long_range_ms: HOUR_MS,
            },
        };
        let err = fill_missing(&[], &[], &cfg).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Reconstruct(ReconstructError::InvalidConfig(_))
        ));
    }
}
