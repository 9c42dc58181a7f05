use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_EXPONENT: u32 = 6;

/// Retry-with-exponential-backoff policy, kept separate from the request
/// mechanism so callers can wrap any fallible operation. Mirrors the client
/// heartbeat convention: 3 attempts, delays of 2s, 4s, 8s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempt: 0,
        }
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt. Returns the delay to wait before the next
    /// try, or None once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exponent = self.attempt.min(MAX_EXPONENT);
        self.attempt += 1;
        Some(self.base_delay.saturating_mul(1 << exponent))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}
