//! Reconnect backoff with exponential growth, jitter and a retry budget

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, jitter included
    pub max_delay_ms: u64,
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,
    /// Random extra delay added to each attempt, `0..=max_jitter_ms`
    pub max_jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            max_jitter_ms: 1_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), with random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.max_jitter_ms)
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// `min(base * 2^(attempt-1) + jitter, max)`
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let backoff = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let ms = backoff.saturating_add(jitter_ms).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Whether `attempt` is past the retry budget
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|a| policy.delay_with_jitter(a, 0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    }

    #[test]
    fn test_capped_at_max() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_with_jitter(6, 0), Duration::from_secs(30));
        assert_eq!(policy.delay_with_jitter(5, 20_000), Duration::from_secs(30));
        assert_eq!(policy.delay_with_jitter(200, 0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay(2).as_millis() as u64;
            assert!((2_000..=3_000).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_no_jitter() {
        let policy = ReconnectPolicy {
            max_jitter_ms: 0,
            ..Default::default()
        };
        assert_eq!(policy.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_budget() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }
}
