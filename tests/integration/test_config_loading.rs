use omniflow::core::config::{ConfigLoader, ConfigValidator};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const OVERRIDES: &[&str] = &[
    "OMNIFLOW_MAX_STEPS_PER_RUN",
    "OMNIFLOW_MAX_NODE_VISITS",
    "OMNIFLOW_CONFLICT_RETRIES",
    "OMNIFLOW_EFFECT_TIMEOUT_MS",
    "OMNIFLOW_EFFECT_MAX_ATTEMPTS",
    "OMNIFLOW_EFFECT_BACKOFF_MS",
    "OMNIFLOW_SUSPEND_TIMEOUT",
    "OMNIFLOW_POLL_INTERVAL",
    "OMNIFLOW_AI_MIN_CONFIDENCE",
    "OMNIFLOW_HTTP_LIVE",
];

fn clear_omniflow_env() {
    for name in OVERRIDES {
        env::remove_var(name);
    }
}

/// Config file values land in every section
#[test]
#[serial]
fn test_config_loading_integration() {
    clear_omniflow_env();
    let temp_dir = TempDir::new().unwrap();
    let state_dir = temp_dir.path();

    let config_content = r#"
[runtime]
max_steps_per_run = 50
max_node_visits = 2
loop_safe_visit_limit = 10

[effects]
timeout_ms = 2500
max_attempts = 6
backoff_ms = 100
backoff_multiplier = 1.5

[suspension]
suspend_timeout = "2d"
poll_interval = "5s"

[ai]
min_confidence = 0.85

[http]
user_agent = "acme-flows/1.0"
"#;
    fs::write(state_dir.join("omniflow.toml"), config_content).unwrap();

    let config = ConfigLoader::load_from_state_dir(state_dir).unwrap();
    assert_eq!(config.runtime.max_steps_per_run, 50);
    assert_eq!(config.runtime.max_node_visits, 2);
    assert_eq!(config.runtime.loop_safe_visit_limit, 10);
    assert_eq!(config.runtime.conflict_retries, 8);
    assert_eq!(config.effect_timeout(), Duration::from_millis(2500));
    assert_eq!(config.effects.max_attempts, 6);
    assert_eq!(config.effects.jitter_ms, 100);
    assert_eq!(config.suspend_timeout(), Duration::from_secs(2 * 24 * 3600));
    assert_eq!(config.poll_interval(), Duration::from_secs(5));
    assert!((config.ai.min_confidence - 0.85).abs() < f64::EPSILON);
    assert_eq!(config.http.user_agent, "acme-flows/1.0");
    assert!(!config.http.live);
    assert!(ConfigValidator::validate(&config).is_ok());
}

/// Environment variables win over the file
#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_omniflow_env();
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("omniflow.toml"),
        "[runtime]\nmax_steps_per_run = 50\n\n[effects]\nmax_attempts = 6\n",
    )
    .unwrap();

    env::set_var("OMNIFLOW_MAX_STEPS_PER_RUN", "75");
    env::set_var("OMNIFLOW_SUSPEND_TIMEOUT", "12h");
    env::set_var("OMNIFLOW_HTTP_LIVE", "true");
    env::set_var("OMNIFLOW_AI_MIN_CONFIDENCE", "0.9");

    let config = ConfigLoader::load_from_state_dir(temp_dir.path()).unwrap();
    assert_eq!(config.runtime.max_steps_per_run, 75);
    assert_eq!(config.effects.max_attempts, 6);
    assert_eq!(config.suspend_timeout(), Duration::from_secs(12 * 3600));
    assert!(config.http.live);
    assert!((config.ai.min_confidence - 0.9).abs() < f64::EPSILON);

    clear_omniflow_env();
}

/// Unparseable overrides are ignored, not fatal
#[test]
#[serial]
fn test_bad_env_override_is_ignored() {
    clear_omniflow_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("OMNIFLOW_EFFECT_MAX_ATTEMPTS", "many");

    let config = ConfigLoader::load_from_state_dir(temp_dir.path()).unwrap();
    assert_eq!(config.effects.max_attempts, 4);

    clear_omniflow_env();
}

/// A missing file yields defaults
#[test]
#[serial]
fn test_missing_config_file_uses_defaults() {
    clear_omniflow_env();
    let temp_dir = TempDir::new().unwrap();

    assert!(ConfigLoader::load_from_file(&temp_dir.path().join("omniflow.toml"))
        .unwrap()
        .is_none());
    let config = ConfigLoader::load_from_state_dir(temp_dir.path()).unwrap();
    assert_eq!(config.runtime.max_steps_per_run, 200);
    assert_eq!(config.runtime.max_node_visits, 1);
    assert_eq!(config.poll_interval(), Duration::from_secs(30));
}

/// Malformed TOML and invalid values are reported
#[test]
#[serial]
fn test_invalid_config_is_rejected() {
    clear_omniflow_env();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("omniflow.toml");

    fs::write(&path, "[runtime\nmax_steps_per_run = ").unwrap();
    let err = ConfigLoader::load_from_state_dir(temp_dir.path()).unwrap_err();
    assert!(err.message.contains("Failed to parse config file"));

    fs::write(&path, "[suspension]\npoll_interval = \"every so often\"\n").unwrap();
    let config = ConfigLoader::load_from_state_dir(temp_dir.path()).unwrap();
    let err = ConfigValidator::validate(&config).unwrap_err();
    assert_eq!(err.code, "FLOW-CONFIG-001");
    assert!(err.message.contains("poll_interval"));
}

#[test]
fn test_env_var_documentation_lists_every_override() {
    let docs = ConfigLoader::env_var_documentation();
    for name in OVERRIDES {
        assert!(docs.iter().any(|line| line.starts_with(name)), "{} undocumented", name);
    }
}
