use std::collections::HashMap;

use sage_domain::config::{Config, ConfigSeverity, Environment};

fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn default_is_development_on_localhost() {
    let config = Config::default();
    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.jupyter_url(), "http://localhost:8888");
    assert_eq!(config.redis_url(), "redis://localhost:6379");
    assert_eq!(config.redis.registry_key, "JUPYTER:KERNELS");
    assert_eq!(config.redis.token_key, "config:jupyter:token");
}

#[test]
fn explicit_urls_win_over_environment() {
    let toml_str = r#"
environment = "production"

[jupyter]
base_url = "http://gateway.internal:9999/"

[redis]
url = "redis://cache:6380"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.environment, Environment::Production);
    assert_eq!(config.jupyter_url(), "http://gateway.internal:9999");
    assert_eq!(config.redis_url(), "redis://cache:6380");
}

#[test]
fn env_overlay_switches_environment_and_tokens() {
    let mut config = Config::default();
    let vars = env_of(&[
        ("ENVIRONMENT", "production"),
        ("SAGE3_SERVER", "wall.example.org"),
        ("TOKEN", "web-token"),
        ("JUPYTER_TOKEN", ""),
    ]);
    config.apply_env_from(|k| vars.get(k).cloned()).unwrap();

    assert_eq!(config.environment, Environment::Production);
    assert_eq!(config.jupyter_url(), "http://jupyter:8888");
    assert_eq!(config.redis_url(), "redis://redis-server:6379");
    assert_eq!(config.web_server_url(), "https://wall.example.org");
    assert_eq!(config.sage3.token.as_deref(), Some("web-token"));
    // Empty values are ignored.
    assert!(config.jupyter.token.is_none());
}

#[test]
fn env_overlay_rejects_unknown_environment() {
    let mut config = Config::default();
    let vars = env_of(&[("ENVIRONMENT", "staging")]);
    assert!(config.apply_env_from(|k| vars.get(k).cloned()).is_err());
}

#[test]
fn validate_flags_bad_urls_as_errors() {
    let toml_str = r#"
[jupyter]
base_url = "jupyter:8888"

[proxy]
connect_attempts = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.field.as_str())
        .collect();
    assert!(errors.contains(&"jupyter.base_url"));
    assert!(errors.contains(&"proxy.connect_attempts"));
}

#[test]
fn default_config_has_only_warnings() {
    let issues = Config::default().validate();
    assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
}

#[test]
fn missing_web_token_is_not_a_finding() {
    let issues = Config::default().validate();
    assert!(issues.iter().all(|i| i.field != "sage3.token"));
}
