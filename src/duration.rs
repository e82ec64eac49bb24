//! Duration strings (`"3h"`, `"3d"`, `"15min"`) and frequency specs.
//!
//! All durations are whole milliseconds. A bare number is read as seconds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SECOND_MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration magnitude in '{0}'")]
    InvalidMagnitude(String),
    #[error("unknown duration unit '{unit}' in '{input}'")]
    UnknownUnit { input: String, unit: String },
    #[error("duration must be positive: '{0}'")]
    NonPositive(String),
}

/// Sampling step of a series: either given, or inferred from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreqSpec {
    Auto,
    Fixed(i64),
}

impl Default for FreqSpec {
    fn default() -> Self {
        Self::Auto
    }
}

impl FromStr for FreqSpec {
    type Err = DurationParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        parse_duration_ms(raw).map(Self::Fixed)
    }
}

impl fmt::Display for FreqSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Fixed(step_ms) => f.write_str(&format_duration_ms(*step_ms)),
        }
    }
}

pub fn parse_duration_ms(input: &str) -> Result<i64, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (magnitude_raw, unit_raw) = trimmed.split_at(split);
    let unit_raw = unit_raw.trim();

    let magnitude: f64 = magnitude_raw
        .parse()
        .map_err(|_| DurationParseError::InvalidMagnitude(trimmed.to_string()))?;
    if !magnitude.is_finite() {
        return Err(DurationParseError::InvalidMagnitude(trimmed.to_string()));
    }

    let unit_ms = unit_to_ms(unit_raw).ok_or_else(|| DurationParseError::UnknownUnit {
        input: trimmed.to_string(),
        unit: unit_raw.to_string(),
    })?;

    let total = (magnitude * unit_ms as f64).round();
    if total <= 0.0 {
        return Err(DurationParseError::NonPositive(trimmed.to_string()));
    }
    if total >= i64::MAX as f64 {
        return Err(DurationParseError::InvalidMagnitude(trimmed.to_string()));
    }

    Ok(total as i64)
}

/// Renders a duration in the largest unit that divides it exactly.
pub fn format_duration_ms(duration_ms: i64) -> String {
    if duration_ms == 0 {
        return "0s".to_string();
    }
    let units = [
        (DAY_MS, "d"),
        (HOUR_MS, "h"),
        (MINUTE_MS, "min"),
        (SECOND_MS, "s"),
    ];
    for (unit_ms, suffix) in units {
        if duration_ms % unit_ms == 0 {
            return format!("{}{suffix}", duration_ms / unit_ms);
        }
    }
    format!("{duration_ms}ms")
}

fn unit_to_ms(unit: &str) -> Option<i64> {
    match unit {
        "" | "s" | "S" | "sec" | "secs" | "second" | "seconds" => Some(SECOND_MS),
        "ms" | "L" | "milli" | "millis" => Some(1),
        "m" | "min" | "mins" | "minute" | "minutes" | "T" => Some(MINUTE_MS),
        "h" | "H" | "hr" | "hrs" | "hour" | "hours" => Some(HOUR_MS),
        "d" | "D" | "day" | "days" => Some(DAY_MS),
        "w" | "W" | "week" | "weeks" => Some(WEEK_MS),
        _ => None,
    }
}
