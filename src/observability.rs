//! Logging setup for the binaries and tests.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! caller's job.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::gaps::GapReport;

pub const LOG_LEVEL_VAR: &str = "TSPREP_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "TSPREP_LOG_FORMAT";
pub const LOG_TARGET_VAR: &str = "TSPREP_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Unset or unparsable variables fall back to [`LoggingConfig::default`].
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();

    let level = env::var(LOG_LEVEL_VAR)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or(defaults.level);
    let format = env::var(LOG_FORMAT_VAR)
        .ok()
        .and_then(|raw| parse_log_format(&raw))
        .unwrap_or(defaults.format);
    let include_target = env::var(LOG_TARGET_VAR)
        .ok()
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(defaults.include_target);

    LoggingConfig {
        level,
        format,
        include_target,
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_input_selected(component: &'static str, source: &str, path: &Path) {
    info!(
        component,
        event = "input.selected",
        source,
        path = %path.display()
    );
}

pub fn log_gap_summary(component: &'static str, report: &GapReport) {
    info!(
        component,
        event = "gaps.summary",
        step_ms = report.step_ms,
        gap_count = report.rows.len(),
        missing_steps = report.total_missing_steps(),
        filled_steps = report.total_filled_steps()
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_logging_env<R>(
        level: Option<&str>,
        format: Option<&str>,
        target: Option<&str>,
        f: impl FnOnce() -> R,
    ) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let vars = [
            (LOG_LEVEL_VAR, level),
            (LOG_FORMAT_VAR, format),
            (LOG_TARGET_VAR, target),
        ];
        let saved: Vec<(&str, Option<String>)> =
            vars.iter().map(|(key, _)| (*key, env::var(key).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        let output = f();
        for (key, value) in saved {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
        output
    }

    #[test]
    fn unset_env_gives_defaults() {
        let cfg = with_logging_env(None, None, None, logging_config_from_env);
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = with_logging_env(
            Some("tsprep=debug"),
            Some("JSON"),
            Some("yes"),
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "tsprep=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.include_target);
    }

    #[test]
    fn garbage_values_fall_back() {
        let cfg = with_logging_env(
            Some("   "),
            Some("xml"),
            Some("sometimes"),
            logging_config_from_env,
        );

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn text_is_an_alias_for_compact() {
        assert_eq!(parse_log_format(" text "), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("pretty"), Some(LogFormat::Pretty));
        assert_eq!(parse_bool("OFF"), Some(false));
    }
}
