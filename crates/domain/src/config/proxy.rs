use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kernel proxy behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Seconds a request may stay pending before the sweeper reports it as
    /// timed out. `0` disables the deadline.
    #[serde(default = "d_600")]
    pub pending_deadline_secs: u64,
    /// How often the sweeper looks for expired requests.
    #[serde(default = "d_5")]
    pub sweep_interval_secs: u64,
    /// Handshake attempts per `add_client` before giving up.
    #[serde(default = "d_3")]
    pub connect_attempts: u32,
    /// Times `cleanup` re-checks the reader tasks before giving up.
    #[serde(default = "d_cleanup_retries")]
    pub cleanup_retries: u32,
    /// Delay between cleanup checks.
    #[serde(default = "d_200")]
    pub cleanup_retry_ms: u64,
    /// Limit on one channels handshake attempt.
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Inbound frames above this size are dropped.
    #[serde(default = "d_max_message_bytes")]
    pub max_message_bytes: usize,
    /// How often `serve` reconciles the registry against the gateway.
    /// `0` disables the periodic pass.
    #[serde(default = "d_60")]
    pub reconcile_interval_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            pending_deadline_secs: 600,
            sweep_interval_secs: 5,
            connect_attempts: 3,
            cleanup_retries: 5,
            cleanup_retry_ms: 200,
            connect_timeout_ms: d_connect_timeout_ms(),
            max_message_bytes: d_max_message_bytes(),
            reconcile_interval_secs: 60,
        }
    }
}

impl ProxyConfig {
    pub fn pending_deadline(&self) -> Option<Duration> {
        (self.pending_deadline_secs > 0).then(|| Duration::from_secs(self.pending_deadline_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn cleanup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_retry_ms)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

fn d_600() -> u64 {
    600
}
fn d_5() -> u64 {
    5
}
fn d_3() -> u32 {
    3
}
fn d_cleanup_retries() -> u32 {
    5
}
fn d_connect_timeout_ms() -> u64 {
    10_000
}
fn d_60() -> u64 {
    60
}
fn d_200() -> u64 {
    200
}
fn d_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_deadline_disables_expiry() {
        let cfg = ProxyConfig {
            pending_deadline_secs: 0,
            ..Default::default()
        };
        assert!(cfg.pending_deadline().is_none());
    }

    #[test]
    fn empty_section_matches_defaults() {
        let cfg: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.cleanup_retries, 5);
        assert_eq!(cfg.connect_attempts, 3);
        assert_eq!(cfg.sweep_interval_secs, 5);
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_message_bytes, ProxyConfig::default().max_message_bytes);
    }

    #[test]
    fn sweep_interval_never_zero() {
        let cfg = ProxyConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
    }
}
