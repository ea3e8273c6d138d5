use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod loader;
pub mod validation;

pub use loader::ConfigLoader;
pub use validation::ConfigValidator;

/// Engine configuration loaded from omniflow.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Step loop guards
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Effect dispatch timeouts and retry policy
    #[serde(default)]
    pub effects: EffectsConfig,

    /// Suspension ceilings and resume polling
    #[serde(default)]
    pub suspension: SuspensionConfig,

    /// AI guardrail defaults
    #[serde(default)]
    pub ai: AiConfig,

    /// HTTP transport configuration
    #[serde(default)]
    pub http: HttpConfig,
}

/// Step loop guards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Total node evaluations allowed for a single run
    #[serde(default = "default_max_steps_per_run")]
    pub max_steps_per_run: u32,

    /// Visits allowed per node unless the node is marked loop-safe
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: u32,

    /// Visits allowed per loop-safe node without an explicit max_visits
    #[serde(default = "default_loop_safe_visit_limit")]
    pub loop_safe_visit_limit: u32,

    /// Reload/re-evaluate attempts after an optimistic concurrency conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

/// Effect dispatch timeouts and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    #[serde(default = "default_effect_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_effect_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// Suspension ceilings and resume polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionConfig {
    /// Ceiling for waits on external events, as a humantime string (e.g. "7d")
    #[serde(default = "default_suspend_timeout")]
    pub suspend_timeout: String,

    /// Interval between due-wait scans, as a humantime string (e.g. "30s")
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

/// AI guardrail defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Confidence below which AI-influenced routing takes the fallback edge
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Use the live HTTP transport instead of the outbox in the CLI
    #[serde(default)]
    pub live: bool,
}

impl EngineConfig {
    pub fn effect_timeout(&self) -> Duration {
        Duration::from_millis(self.effects.timeout_ms)
    }

    /// Parsed suspension ceiling. Falls back to the default when the value is not a valid duration.
    pub fn suspend_timeout(&self) -> Duration {
        humantime::parse_duration(&self.suspension.suspend_timeout)
            .unwrap_or_else(|_| Duration::from_secs(7 * 24 * 3600))
    }

    pub fn poll_interval(&self) -> Duration {
        humantime::parse_duration(&self.suspension.poll_interval)
            .unwrap_or_else(|_| Duration::from_secs(30))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: default_max_steps_per_run(),
            max_node_visits: default_max_node_visits(),
            loop_safe_visit_limit: default_loop_safe_visit_limit(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_effect_timeout_ms(),
            max_attempts: default_effect_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for SuspensionConfig {
    fn default() -> Self {
        Self {
            suspend_timeout: default_suspend_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            live: false,
        }
    }
}

// Default functions
fn default_max_steps_per_run() -> u32 {
    200
}

fn default_max_node_visits() -> u32 {
    1
}

fn default_loop_safe_visit_limit() -> u32 {
    25
}

fn default_conflict_retries() -> u32 {
    8
}

fn default_effect_timeout_ms() -> u64 {
    10_000
}

fn default_effect_max_attempts() -> u32 {
    4
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_backoff_multiplier() -> f32 {
    2.0
}

fn default_jitter_ms() -> u64 {
    100
}

fn default_suspend_timeout() -> String {
    "7d".to_string()
}

fn default_poll_interval() -> String {
    "30s".to_string()
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_user_agent() -> String {
    format!("omniflow/{}", env!("CARGO_PKG_VERSION"))
}
