//! Reconnect pacing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff configuration for link reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay_ms: u64,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay_ms: u64,

    /// Maximum consecutive failed connects before the supervisor gives up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { initial_delay_ms: 1_000, max_delay_ms: 30_000, max_retries: None }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// `delay = min(initial * 2^attempt, max) * (1 + 0.25 * sin(attempt * 7.3))`
///
/// The jitter term is deterministic so tests can predict it.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay().as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_delay().as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_initial_delay() {
        let config = ReconnectConfig::default();
        // sin(0) == 0, so no jitter on the first attempt
        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(1));
    }

    #[test]
    fn backoff_is_capped_within_jitter() {
        let config = ReconnectConfig::default();
        for attempt in 0..64 {
            let delay = calculate_backoff(attempt, &config).as_secs_f64();
            assert!(delay <= 30.0 * 1.25 + 1e-9, "attempt {attempt}: {delay}");
            assert!(delay >= 0.75 - 1e-9, "attempt {attempt}: {delay}");
        }
        let late = calculate_backoff(20, &config).as_secs_f64();
        assert!(late >= 30.0 * 0.75);
    }

    #[test]
    fn grows_before_the_cap() {
        let config =
            ReconnectConfig { initial_delay_ms: 100, max_delay_ms: 60_000, max_retries: None };
        let d1 = calculate_backoff(1, &config).as_secs_f64();
        let d4 = calculate_backoff(4, &config).as_secs_f64();
        assert!(d4 > d1);
    }
}
