use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kernel gateway connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupyterConfig {
    /// HTTP base URL of the kernel gateway. When unset, the environment
    /// default is used.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Gateway token. When unset, it is read from Redis at startup.
    #[serde(default)]
    pub token: Option<String>,
    /// `header.username` stamped on outbound kernel messages.
    #[serde(default = "d_username")]
    pub username: String,
    /// Timeout for REST calls against the gateway.
    #[serde(default = "d_10000")]
    pub request_timeout_ms: u64,
}

impl Default for JupyterConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            username: d_username(),
            request_timeout_ms: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SAGE3 web server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sage3Config {
    /// Web server host (`SAGE3_SERVER`).
    #[serde(default)]
    pub server: Option<String>,
    /// Bearer token for the web server API (`TOKEN`).
    #[serde(default)]
    pub token: Option<String>,
}

fn d_username() -> String {
    "sage3".into()
}
fn d_10000() -> u64 {
    10_000
}
