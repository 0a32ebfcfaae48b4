//! Upstream reconnect pacing.
//!
//! The relay waits a fixed delay between attempts and never gives up unless
//! an attempt cap is configured.

use std::time::Duration;

/// Reconnect pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Wait between consecutive attempts.
    pub delay: Duration,
    /// Attempts before giving up. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl ReconnectConfig {
    /// Retry forever, waiting `delay` between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: 0,
        }
    }

    /// Give up after `attempts` consecutive failures.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Tracks consecutive failures and hands out the next delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Start with no failures recorded.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt += 1;
        Some(self.config.delay)
    }

    /// Forget past failures after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt < self.config.max_attempts
    }
}

/// Terminal relay failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Gave up after the configured number of attempts.
    #[error("upstream unreachable after {0} attempts")]
    MaxAttemptsExceeded(u32),

    /// The upstream connection failed.
    #[error("upstream connection failed: {0}")]
    ConnectionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_grows_or_gives_up() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(250)));

        for _ in 0..100 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(250)));
        }
        assert!(policy.should_retry());
        assert_eq!(policy.attempt_count(), 100);
    }

    #[test]
    fn default_is_one_second_forever() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let config = ReconnectConfig::fixed(Duration::from_millis(10)).with_max_attempts(2);
        let mut policy = ReconnectPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(!policy.should_retry());
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_allows_a_fresh_run_of_attempts() {
        let config = ReconnectConfig::fixed(Duration::from_millis(10)).with_max_attempts(1);
        let mut policy = ReconnectPolicy::new(config);
        policy.next_delay();
        assert_eq!(policy.next_delay(), None);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }
}
