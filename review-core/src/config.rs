//! Engine configuration: the knobs the review graph reads at startup, loaded from
//! environment variables with a deterministic precedence order and a
//! deprecated-flag shim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::model::ExecutionMode;

static DEPRECATED_FLAG_WARNED: AtomicBool = AtomicBool::new(false);

/// Top-level engine configuration. Precedence for every field: explicit
/// constructor argument (if the caller built one directly) > environment
/// variable > built-in default.
#[derive(Debug, Clone)]
pub struct ReviewEngineConfig {
    pub execution_mode: ExecutionMode,
    pub react_max_iterations: u32,
    pub react_temperature: f64,
    pub react_clause_timeout: Duration,
}

impl Default for ReviewEngineConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Gen3,
            react_max_iterations: 5,
            react_temperature: 0.2,
            react_clause_timeout: Duration::from_secs(120),
        }
    }
}

impl ReviewEngineConfig {
    /// Load from environment variables, falling back to defaults. The
    /// deprecated `REVIEW_USE_LEGACY_EXECUTION=1` boolean is still honored
    /// for one release cycle — it is equivalent to `REVIEW_EXECUTION_MODE=legacy`
    /// and logs a one-time deprecation warning the first time it is read
    /// ("Config precedence and deprecation").
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let execution_mode = match std::env::var("REVIEW_EXECUTION_MODE") {
            Ok(value) => parse_execution_mode(&value).unwrap_or(defaults.execution_mode),
            Err(_) => match std::env::var("REVIEW_USE_LEGACY_EXECUTION") {
                Ok(value) => {
                    warn_deprecated_flag_once();
                    if is_truthy(&value) {
                        ExecutionMode::Legacy
                    } else {
                        ExecutionMode::Gen3
                    }
                }
                Err(_) => defaults.execution_mode,
            },
        };

        let react_max_iterations = std::env::var("REVIEW_REACT_MAX_ITERATIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.react_max_iterations);

        let react_temperature = std::env::var("REVIEW_REACT_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.react_temperature);

        let react_clause_timeout = std::env::var("REVIEW_REACT_CLAUSE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.react_clause_timeout);

        Self {
            execution_mode,
            react_max_iterations,
            react_temperature,
            react_clause_timeout,
        }
    }
}

fn parse_execution_mode(raw: &str) -> Option<ExecutionMode> {
    match raw.to_ascii_lowercase().as_str() {
        "legacy" => Some(ExecutionMode::Legacy),
        "gen3" => Some(ExecutionMode::Gen3),
        _ => None,
    }
}

fn is_truthy(raw: &str) -> bool {
    raw != "0" && raw.to_ascii_lowercase() != "false"
}

fn warn_deprecated_flag_once() {
    if DEPRECATED_FLAG_WARNED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        tracing::warn!(
            "REVIEW_USE_LEGACY_EXECUTION is deprecated, use REVIEW_EXECUTION_MODE=legacy|gen3 instead"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Run as one test: these cases all mutate the same process-wide env vars,
    // and `cargo test` runs tests in parallel by default within a binary.
    #[test]
    fn execution_mode_precedence_and_deprecation_shim() {
        std::env::remove_var("REVIEW_EXECUTION_MODE");
        std::env::remove_var("REVIEW_USE_LEGACY_EXECUTION");
        assert_eq!(ReviewEngineConfig::from_env().execution_mode, ExecutionMode::Gen3);

        std::env::set_var("REVIEW_EXECUTION_MODE", "legacy");
        std::env::set_var("REVIEW_USE_LEGACY_EXECUTION", "0");
        assert_eq!(ReviewEngineConfig::from_env().execution_mode, ExecutionMode::Legacy);

        std::env::remove_var("REVIEW_EXECUTION_MODE");
        assert_eq!(ReviewEngineConfig::from_env().execution_mode, ExecutionMode::Legacy);

        std::env::remove_var("REVIEW_USE_LEGACY_EXECUTION");
    }
}
