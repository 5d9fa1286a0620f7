//! Retry schedule for opening a kernel's channels socket.

use std::time::Duration;

use sage_domain::config::ProxyConfig;

/// How `add_client` spaces out handshake attempts against one kernel.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Wait after the first failure.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Total handshake attempts. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_attempts: 3,
        }
    }
}

impl ReconnectBackoff {
    pub fn from_config(cfg: &ProxyConfig) -> Self {
        Self {
            max_attempts: cfg.connect_attempts,
            ..Default::default()
        }
    }

    /// How long to wait after `failures` failed handshakes with
    /// `kernel_id`, or `None` once the attempt budget is spent.
    ///
    /// Up to 25% is added on top, seeded by the kernel id so sessions to
    /// different kernels dropped by the same gateway restart spread out.
    pub fn next_delay(&self, kernel_id: &str, failures: u32) -> Option<Duration> {
        if self.max_attempts > 0 && failures >= self.max_attempts {
            return None;
        }
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap_ms = self.max_delay.as_millis() as f64;
        let ms = (self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent))
            .min(cap_ms)
            .max(0.0);
        let jitter = ms * 0.25 * spread(kernel_id, failures);
        Some(Duration::from_millis((ms + jitter) as u64))
    }
}

/// FNV-1a of the kernel id and attempt, mapped onto [0, 1).
fn spread(kernel_id: &str, failures: u32) -> f64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in kernel_id.bytes().chain(failures.to_le_bytes()) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_total_attempts() {
        let b = ReconnectBackoff::default();
        assert!(b.next_delay("k", 1).is_some());
        assert!(b.next_delay("k", 2).is_some());
        assert!(b.next_delay("k", 3).is_none());
    }

    #[test]
    fn delays_grow_until_the_cap() {
        let b = ReconnectBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            backoff_factor: 2.0,
            max_attempts: 0,
        };
        let first = b.next_delay("k", 1).unwrap();
        let second = b.next_delay("k", 2).unwrap();
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(126));
        assert!(second >= Duration::from_millis(200) && second < Duration::from_millis(251));
        // Huge attempt counts stay at the cap plus jitter.
        assert!(b.next_delay("k", 10_000).unwrap() <= Duration::from_millis(500));
    }

    #[test]
    fn jitter_differs_between_kernels() {
        let b = ReconnectBackoff {
            max_attempts: 0,
            ..Default::default()
        };
        let delays: std::collections::HashSet<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|k| b.next_delay(k, 4))
            .collect();
        assert!(delays.len() > 1);
    }

    #[test]
    fn config_sets_attempt_budget() {
        let cfg = ProxyConfig {
            connect_attempts: 1,
            ..Default::default()
        };
        assert!(ReconnectBackoff::from_config(&cfg).next_delay("k", 1).is_none());
    }
}
