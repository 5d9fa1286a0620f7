use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deployment environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the proxy runs. Selects the default endpoints for the kernel
/// gateway, Redis, and the SAGE3 web server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Inside the docker-compose stack; services are addressed by name.
    Production,
    /// Backend services on localhost, web server elsewhere.
    Backend,
    #[default]
    Development,
}

impl Environment {
    pub fn default_jupyter_url(self) -> &'static str {
        match self {
            Environment::Production => "http://jupyter:8888",
            Environment::Backend | Environment::Development => "http://localhost:8888",
        }
    }

    pub fn default_redis_url(self) -> &'static str {
        match self {
            Environment::Production => "redis://redis-server:6379",
            Environment::Backend | Environment::Development => "redis://localhost:6379",
        }
    }

    /// Base URL of the SAGE3 web server for the given host.
    pub fn web_server_url(self, server: Option<&str>) -> String {
        match (self, server) {
            (Environment::Production, Some(host)) => format!("https://{host}"),
            (Environment::Production, None) => "https://localhost".into(),
            (Environment::Backend, Some(host)) => format!("http://{host}"),
            (Environment::Backend, None) | (Environment::Development, _) => {
                "http://localhost:3333".into()
            }
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "backend" => Ok(Environment::Backend),
            "development" => Ok(Environment::Development),
            other => Err(format!(
                "unknown environment {other:?} (expected production, backend or development)"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Backend => "backend",
            Environment::Development => "development",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(" backend ".parse::<Environment>(), Ok(Environment::Backend));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn production_uses_service_names() {
        let env = Environment::Production;
        assert_eq!(env.default_jupyter_url(), "http://jupyter:8888");
        assert_eq!(env.default_redis_url(), "redis://redis-server:6379");
        assert_eq!(env.web_server_url(Some("wall.example.org")), "https://wall.example.org");
    }

    #[test]
    fn development_ignores_server_host() {
        let env = Environment::Development;
        assert_eq!(env.web_server_url(Some("wall.example.org")), "http://localhost:3333");
    }
}
