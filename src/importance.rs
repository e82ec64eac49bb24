//! Permutation feature importance with random probe columns.
//!
//! Three probe columns (`RAND_bin`, `RAND_uniform`, `RAND_int`) are appended
//! before fitting. A feature is important when its score beats the best probe
//! by more than the probes' standard deviation.

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::features::FeatureTable;

pub const PROBE_COLUMNS: [&str; 3] = ["RAND_bin", "RAND_uniform", "RAND_int"];

/// Regression model scored by [`permutation_feature_importance`].
pub trait Regressor {
    type Error: std::error::Error;

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), Self::Error>;
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, Self::Error>;
}

#[derive(Debug, Error)]
pub enum ImportanceError {
    #[error("unknown target column: {0}")]
    UnknownTarget(String),
    #[error("no rows with a complete set of features and target")]
    NoCompleteRows,
    #[error("model returned {actual} predictions for {expected} rows")]
    PredictionLength { expected: usize, actual: usize },
    #[error("model error: {0}")]
    Model(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportanceConfig {
    pub n_repeats: usize,
    pub seed: Option<u64>,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            n_repeats: 3,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub value: f64,
    pub important: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceReport {
    pub baseline_mae: f64,
    pub threshold: f64,
    pub rows_used: usize,
    /// Sorted by `value`, largest first.
    pub features: Vec<FeatureImportance>,
}

pub fn permutation_feature_importance<M: Regressor>(
    table: &FeatureTable,
    target: &str,
    model: &mut M,
    cfg: &ImportanceConfig,
) -> Result<ImportanceReport, ImportanceError> {
    let target_idx = table
        .position(target)
        .ok_or_else(|| ImportanceError::UnknownTarget(target.to_string()))?;
    let feature_idx: Vec<usize> = (0..table.columns.len())
        .filter(|idx| *idx != target_idx)
        .collect();

    let mut x: Vec<Vec<f64>> = Vec::new();
    let mut y: Vec<f64> = Vec::new();
    for row in 0..table.len() {
        let Some(target_value) = table.data[target_idx][row] else {
            continue;
        };
        let features: Option<Vec<f64>> = feature_idx
            .iter()
            .map(|col| table.data[*col][row])
            .collect();
        if let Some(features) = features {
            x.push(features);
            y.push(target_value);
        }
    }
    if x.is_empty() {
        return Err(ImportanceError::NoCompleteRows);
    }

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    for row in &mut x {
        row.push(f64::from(rng.gen_range(0..2u8)));
        row.push(rng.gen::<f64>());
        row.push(f64::from(rng.gen_range(0..100u8)));
    }

    let mut names: Vec<String> = feature_idx
        .iter()
        .map(|idx| table.columns[*idx].name.clone())
        .collect();
    names.extend(PROBE_COLUMNS.iter().map(|name| name.to_string()));

    model
        .fit(&x, &y)
        .map_err(|err| ImportanceError::Model(err.to_string()))?;
    let baseline_mae = score(model, &x, &y)?;

    let n_repeats = cfg.n_repeats.max(1);
    let mut features = Vec::with_capacity(names.len());
    for (col, name) in names.iter().enumerate() {
        let mut deltas = Vec::with_capacity(n_repeats);
        for _ in 0..n_repeats {
            let mut column: Vec<f64> = x.iter().map(|row| row[col]).collect();
            column.shuffle(&mut rng);
            let permuted: Vec<Vec<f64>> = x
                .iter()
                .zip(column)
                .map(|(row, value)| {
                    let mut row = row.clone();
                    row[col] = value;
                    row
                })
                .collect();
            deltas.push(baseline_mae - score(model, &permuted, &y)?);
        }
        let value = -(deltas.iter().sum::<f64>() / deltas.len() as f64);
        debug!(
            component = "importance",
            event = "importance.feature.scored",
            feature = %name,
            value = value
        );
        features.push(FeatureImportance {
            feature: name.clone(),
            value,
            important: false,
        });
    }

    let probe_values: Vec<f64> = features
        .iter()
        .filter(|f| PROBE_COLUMNS.contains(&f.feature.as_str()))
        .map(|f| f.value)
        .collect();
    let threshold = probe_values.iter().copied().fold(f64::MIN, f64::max)
        + sample_std(&probe_values);
    for feature in &mut features {
        feature.important = feature.value > threshold;
    }
    features.sort_by(|a, b| b.value.total_cmp(&a.value));

    info!(
        component = "importance",
        event = "importance.finish",
        rows_used = y.len(),
        features = features.len(),
        important = features.iter().filter(|f| f.important).count(),
        baseline_mae = baseline_mae,
        threshold = threshold
    );

    Ok(ImportanceReport {
        baseline_mae,
        threshold,
        rows_used: y.len(),
        features,
    })
}

fn score<M: Regressor>(model: &M, x: &[Vec<f64>], y: &[f64]) -> Result<f64, ImportanceError> {
    let predicted = model
        .predict(x)
        .map_err(|err| ImportanceError::Model(err.to_string()))?;
    if predicted.len() != y.len() {
        return Err(ImportanceError::PredictionLength {
            expected: y.len(),
            actual: predicted.len(),
        });
    }
    Ok(mean_absolute_error(&predicted, y))
}

fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Standard deviation with `n - 1` in the denominator; 0 for fewer than 2 values.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}
