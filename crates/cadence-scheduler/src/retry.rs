use std::time::Duration;

use cadence_core::config::EngineConfig;
use chrono::{DateTime, TimeDelta, Utc};

/// Exponential backoff with a ceiling: attempt `n` (1-based) waits
/// `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base: Duration::from_secs(cfg.retry_base_secs),
            cap: Duration::from_secs(cfg.retry_max_secs),
        }
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// When the next attempt may run after the `retry_count`-th failure, or
    /// `None` once retries are used up.
    pub fn next_attempt(&self, retry_count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if retry_count > self.max_retries {
            return None;
        }
        let delay = TimeDelta::from_std(self.backoff(retry_count)).unwrap_or(TimeDelta::MAX);
        Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_secs(60),
            cap: Duration::from_secs(200),
        }
    }

    #[test]
    fn doubles_then_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(60));
        assert_eq!(p.backoff(2), Duration::from_secs(120));
        assert_eq!(p.backoff(3), Duration::from_secs(200));
        assert_eq!(p.backoff(40), Duration::from_secs(200));
    }

    #[test]
    fn stops_after_max_retries() {
        let p = policy();
        let now: DateTime<Utc> = "2026-11-01T09:00:00Z".parse().unwrap();
        assert_eq!(
            p.next_attempt(1, now).unwrap().to_rfc3339(),
            "2026-11-01T09:01:00+00:00"
        );
        assert!(p.next_attempt(3, now).is_some());
        assert!(p.next_attempt(4, now).is_none());
    }
}
