#![allow(clippy::result_large_err)]

use super::EngineConfig;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration rules
    pub fn validate(config: &EngineConfig) -> Result<(), AppError> {
        if config.runtime.max_steps_per_run == 0 {
            return Err(invalid("runtime.max_steps_per_run must be >= 1"));
        }
        if config.runtime.max_node_visits == 0 {
            return Err(invalid("runtime.max_node_visits must be >= 1"));
        }
        if config.runtime.loop_safe_visit_limit < config.runtime.max_node_visits {
            return Err(invalid(
                "runtime.loop_safe_visit_limit must be >= runtime.max_node_visits",
            ));
        }
        if config.effects.max_attempts == 0 {
            return Err(invalid("effects.max_attempts must be >= 1"));
        }
        if config.effects.timeout_ms == 0 {
            return Err(invalid("effects.timeout_ms must be >= 1"));
        }
        if config.effects.backoff_multiplier < 1.0 {
            return Err(invalid("effects.backoff_multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&config.ai.min_confidence) {
            return Err(invalid("ai.min_confidence must be within [0, 1]"));
        }
        humantime::parse_duration(&config.suspension.suspend_timeout).map_err(|err| {
            invalid(format!(
                "suspension.suspend_timeout '{}' is not a duration: {}",
                config.suspension.suspend_timeout, err
            ))
        })?;
        humantime::parse_duration(&config.suspension.poll_interval).map_err(|err| {
            invalid(format!(
                "suspension.poll_interval '{}' is not a duration: {}",
                config.suspension.poll_interval, err
            ))
        })?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::ValidationError, message).with_code("FLOW-CONFIG-001")
}
