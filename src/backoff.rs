//! Exponential retry delay for the scheduler loop
//!
//! Each call to `next_delay` hands out the current delay and doubles it for
//! the following failure, capped at the configured maximum. A clean cycle
//! calls `reset` to return to the floor.

use std::time::Duration;

pub const BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
pub struct RetryBackoff {
    config: BackoffConfig,
    current_delay: Duration,
    consecutive_failures: u32,
}

impl RetryBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current_delay,
            consecutive_failures: 0,
        }
    }

    /// Delay to wait after the failure just recorded.
    pub fn next_delay(&mut self) -> Duration {
        self.consecutive_failures += 1;
        let delay = self.current_delay.min(self.config.max_delay);
        self.current_delay = std::cmp::min(
            self.current_delay.saturating_mul(BACKOFF_FACTOR),
            self.config.max_delay,
        );
        delay
    }

    /// Delay the next failure would get, without recording one.
    pub fn peek(&self) -> Duration {
        self.current_delay.min(self.config.max_delay)
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial: u64, max: u64) -> RetryBackoff {
        RetryBackoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(initial),
            max_delay: Duration::from_secs(max),
        })
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let mut backoff = backoff(5, 60);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(backoff.consecutive_failures(), 6);
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = backoff(5, 300);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek(), Duration::from_secs(20));

        backoff.reset();
        assert_eq!(backoff.peek(), Duration::from_secs(5));
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_initial_above_cap_is_clamped() {
        let mut backoff = backoff(500, 300);
        assert_eq!(backoff.next_delay(), Duration::from_secs(300));
    }
}
