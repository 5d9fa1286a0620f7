use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis (kernel registry + gateway token)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL. When unset, the environment default is used.
    #[serde(default)]
    pub url: Option<String>,
    /// RedisJSON document holding the kernel registry.
    #[serde(default = "d_registry_key")]
    pub registry_key: String,
    /// String key holding the kernel gateway token.
    #[serde(default = "d_token_key")]
    pub token_key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            registry_key: d_registry_key(),
            token_key: d_token_key(),
        }
    }
}

fn d_registry_key() -> String {
    "JUPYTER:KERNELS".into()
}
fn d_token_key() -> String {
    "config:jupyter:token".into()
}
