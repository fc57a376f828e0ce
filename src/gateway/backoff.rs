// ABOUTME: Bounded retry policy for tenant connection startup
// ABOUTME: Exponential delay capped at a maximum; equal base and cap gives a fixed wait

use std::time::Duration;

/// Retry schedule for connection attempts.
///
/// Delay before retry `n` (0-indexed) is `min(base * 2^n, max)`. The policy
/// allows `max_attempts` attempts in total; once they are used up
/// [`ConnectBackoff::next_delay`] returns `None`.
#[derive(Debug, Clone)]
pub struct ConnectBackoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ConnectBackoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    /// Same delay between every attempt
    #[must_use]
    pub const fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self::new(delay, delay, max_attempts)
    }

    /// Record a failed attempt and return how long to wait before the next.
    ///
    /// Returns `None` when the failed attempt was the last one allowed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            return None;
        }

        let multiplier = 2u64.saturating_pow(self.attempts - 1);
        let base_millis = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(base_millis.saturating_mul(multiplier));
        Some(delay.min(self.max))
    }

    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed attempts recorded so far
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
