#![allow(clippy::result_large_err)]

use super::EngineConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use std::env;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load config from the state directory (state_dir/omniflow.toml).
    /// Environment variables override config file values.
    pub fn load_from_state_dir(state_dir: &Path) -> Result<EngineConfig, AppError> {
        let config_path = state_dir.join("omniflow.toml");
        let mut config = Self::load_from_file(&config_path)?.unwrap_or_default();
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load config from specific file path
    /// Returns Ok(None) if file doesn't exist
    pub fn load_from_file(path: &Path) -> Result<Option<EngineConfig>, AppError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(
                ErrorCategory::IoError,
                format!("Failed to read config file {}: {}", path.display(), e),
            )
        })?;

        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("Failed to parse config file {}: {}", path.display(), e),
            )
        })?;

        Ok(Some(config))
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(config: &mut EngineConfig) {
        if let Some(value) = parse_env("OMNIFLOW_MAX_STEPS_PER_RUN") {
            config.runtime.max_steps_per_run = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_MAX_NODE_VISITS") {
            config.runtime.max_node_visits = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_CONFLICT_RETRIES") {
            config.runtime.conflict_retries = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_EFFECT_TIMEOUT_MS") {
            config.effects.timeout_ms = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_EFFECT_MAX_ATTEMPTS") {
            config.effects.max_attempts = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_EFFECT_BACKOFF_MS") {
            config.effects.backoff_ms = value;
        }
        if let Ok(value) = env::var("OMNIFLOW_SUSPEND_TIMEOUT") {
            config.suspension.suspend_timeout = value;
        }
        if let Ok(value) = env::var("OMNIFLOW_POLL_INTERVAL") {
            config.suspension.poll_interval = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_AI_MIN_CONFIDENCE") {
            config.ai.min_confidence = value;
        }
        if let Some(value) = parse_env("OMNIFLOW_HTTP_LIVE") {
            config.http.live = value;
        }
    }

    /// Get documentation for supported environment variables
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "OMNIFLOW_MAX_STEPS_PER_RUN - Override the run-wide step budget (default: 200)",
            "OMNIFLOW_MAX_NODE_VISITS - Override visits allowed per node (default: 1)",
            "OMNIFLOW_CONFLICT_RETRIES - Override conflict reload attempts (default: 8)",
            "OMNIFLOW_EFFECT_TIMEOUT_MS - Override the per-dispatch timeout (default: 10000)",
            "OMNIFLOW_EFFECT_MAX_ATTEMPTS - Override dispatch attempts (default: 4)",
            "OMNIFLOW_EFFECT_BACKOFF_MS - Override the initial retry backoff (default: 250)",
            "OMNIFLOW_SUSPEND_TIMEOUT - Override the external-event ceiling (default: 7d)",
            "OMNIFLOW_POLL_INTERVAL - Override the due-wait scan interval (default: 30s)",
            "OMNIFLOW_AI_MIN_CONFIDENCE - Override the default AI guardrail threshold (default: 0.7)",
            "OMNIFLOW_HTTP_LIVE - Send HttpRequest effects over the network (true/false)",
        ]
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
