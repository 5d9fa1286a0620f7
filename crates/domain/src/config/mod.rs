mod environment;
mod jupyter;
mod observability;
mod proxy;
mod redis;

pub use environment::*;
pub use jupyter::*;
pub use observability::*;
pub use proxy::*;
pub use redis::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub sage3: Sage3Config,
    #[serde(default)]
    pub jupyter: JupyterConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Overlay the process environment (`ENVIRONMENT`, `SAGE3_SERVER`,
    /// `TOKEN`, `JUPYTER_TOKEN`).
    pub fn apply_env(&mut self) -> Result<(), String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), String> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = non_empty("ENVIRONMENT") {
            self.environment = env.parse()?;
        }
        if let Some(server) = non_empty("SAGE3_SERVER") {
            self.sage3.server = Some(server);
        }
        if let Some(token) = non_empty("TOKEN") {
            self.sage3.token = Some(token);
        }
        if let Some(token) = non_empty("JUPYTER_TOKEN") {
            self.jupyter.token = Some(token);
        }
        Ok(())
    }

    /// Kernel gateway HTTP base URL, without a trailing slash.
    pub fn jupyter_url(&self) -> String {
        self.jupyter
            .base_url
            .as_deref()
            .unwrap_or(self.environment.default_jupyter_url())
            .trim_end_matches('/')
            .to_owned()
    }

    pub fn redis_url(&self) -> String {
        self.redis
            .url
            .clone()
            .unwrap_or_else(|| self.environment.default_redis_url().to_owned())
    }

    pub fn web_server_url(&self) -> String {
        self.environment
            .web_server_url(self.sage3.server.as_deref())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let jupyter = self.jupyter_url();
        if !(jupyter.starts_with("http://") || jupyter.starts_with("https://")) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "jupyter.base_url".into(),
                message: format!("{jupyter:?} must be an http(s) URL"),
            });
        }

        if !self.redis_url().starts_with("redis") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "redis.url".into(),
                message: "must be a redis:// or rediss:// URL".into(),
            });
        }

        if self.redis.registry_key.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "redis.registry_key".into(),
                message: "registry key must not be empty".into(),
            });
        }

        if self.proxy.connect_attempts == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "proxy.connect_attempts".into(),
                message: "at least one connection attempt is required".into(),
            });
        }

        if self.proxy.pending_deadline_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "proxy.pending_deadline_secs".into(),
                message: "no deadline: requests that never go idle stay pending forever".into(),
            });
        }

        if self.environment == Environment::Production && self.sage3.server.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sage3.server".into(),
                message: "SAGE3_SERVER is not set in production".into(),
            });
        }

        errors
    }
}
