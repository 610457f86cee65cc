//! # Conflict Backoff
//!
//! Fixed, bounded schedule for optimistic-concurrency retries.
//!
//! The delays follow a Fibonacci progression in milliseconds, capped at a
//! maximum, for a fixed number of attempts: with the defaults the schedule
//! is 10ms, 10ms, 20ms, 30ms and then the five-attempt budget is spent.

use std::time::Duration;

/// Bounded Fibonacci backoff for conflict retries
///
/// Each call to [`next_delay`](Self::next_delay) yields the pause before the
/// next attempt, or `None` once every attempt has been used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictBackoff {
    /// First delay in milliseconds (for reset)
    base_millis: u64,
    /// Cap on any single delay in milliseconds
    max_millis: u64,
    /// Total attempts, including the first one
    max_attempts: u32,
    prev_millis: u64,
    current_millis: u64,
    attempts_used: u32,
}

impl Default for ConflictBackoff {
    /// 5 attempts, 10ms base, 1s cap
    fn default() -> Self {
        Self::new(10, 1_000, 5)
    }
}

impl ConflictBackoff {
    /// Create a schedule
    ///
    /// # Arguments
    ///
    /// * `base_millis` - Delay before the first retry
    /// * `max_millis` - Cap for any delay
    /// * `max_attempts` - Total number of attempts (the first attempt included)
    #[must_use]
    pub fn new(base_millis: u64, max_millis: u64, max_attempts: u32) -> Self {
        Self {
            base_millis,
            max_millis,
            max_attempts,
            prev_millis: 0,
            current_millis: base_millis,
            attempts_used: 1,
        }
    }

    /// Total attempts this schedule allows
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt, or `None` when the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts_used >= self.max_attempts {
            return None;
        }
        self.attempts_used += 1;

        let result = self.current_millis;
        let next = self.prev_millis + self.current_millis;
        self.prev_millis = self.current_millis;
        self.current_millis = std::cmp::min(next, self.max_millis);

        Some(Duration::from_millis(result))
    }

    /// Restart the schedule from the first attempt
    pub fn reset(&mut self) {
        self.prev_millis = 0;
        self.current_millis = self.base_millis;
        self.attempts_used = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    #[test]
    fn test_default_schedule() {
        let mut backoff = ConflictBackoff::default();
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), ms(20));
        assert_eq!(backoff.next_delay(), ms(30));
        // 5 attempts means 4 pauses
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_delays_are_capped() {
        let mut backoff = ConflictBackoff::new(100, 250, 8);
        assert_eq!(backoff.next_delay(), ms(100));
        assert_eq!(backoff.next_delay(), ms(100));
        assert_eq!(backoff.next_delay(), ms(200));
        assert_eq!(backoff.next_delay(), ms(250));
        assert_eq!(backoff.next_delay(), ms(250));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut backoff = ConflictBackoff::new(10, 1_000, 1);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset() {
        let mut backoff = ConflictBackoff::new(10, 1_000, 3);
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();

        assert_eq!(backoff.next_delay(), ms(10));
    }
}
