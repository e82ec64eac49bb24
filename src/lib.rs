//! Time-series preparation crate.
//!
//! Current implemented scope:
//! - duration strings and frequency specs
//! - resampling raw observations onto a regular UTC grid
//! - gap detection, tiering and day-anchored reconstruction
//! - calendar, lag and periodic feature encoders with schema fingerprints
//! - permutation feature importance against random probe columns
//! - SQLite table adapter

mod duration;
mod features;
mod gaps;
mod importance;
mod observability;
mod pipeline;
mod reconstruct;
mod resample;
mod series;
mod store;

pub use duration::{
    format_duration_ms, parse_duration_ms, DurationParseError, FreqSpec, DAY_MS, HOUR_MS,
    MINUTE_MS, SECOND_MS, WEEK_MS,
};
pub use features::{
    add_datetime_features, add_lagged_features, add_periodic_features, assert_schema_compatible,
    compute_spectrum, FeatureColumn, FeatureDType, FeatureError, FeatureSchema, FeatureTable,
    SpectrumBin, FEATURE_SCHEMA_VERSION, TARGET_COLUMN,
};
pub use gaps::{detect_gaps, Gap, GapReport, GapReportRow, GapTier, GAP_REPORT_HEADERS};
pub use importance::{
    permutation_feature_importance, FeatureImportance, ImportanceConfig, ImportanceError,
    ImportanceReport, Regressor, PROBE_COLUMNS,
};
pub use observability::{
    init_logging, log_app_start, log_gap_summary, log_input_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{fill_missing, prep_config_from_env, PipelineError, PrepConfig};
pub use reconstruct::{
    day_anchored_value, fill_gap, interpolate_day_anchored, interpolate_linear, reconstruct,
    ReconstructConfig, ReconstructError, DEFAULT_RANGES,
};
pub use resample::{dedup_observations, infer_step_ms, resample, ResampleError, MAX_GRID_POINTS};
pub use series::{
    format_timestamp_ms, parse_timestamp_ms, Observation, Series, SeriesRow, TimestampError,
};
pub use store::{
    validate_identifier, SeriesStore, StoreConfig, StoreError, StoredTable, DT_COLUMN, Y_COLUMN,
};
