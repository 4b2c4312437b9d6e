//! Reconnect policy: exponential back-off with a hard attempt cap.

use std::time::Duration;

/// Controls how the session manager reconnects after a drop.
///
/// Delays are deterministic: `min_delay * 2^(attempt-1)`, capped at
/// `max_delay`. Once `max_attempts` consecutive failures have been
/// burned, the manager stops retrying until the next explicit connect.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub min_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Maximum number of consecutive automatic attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let exp = attempt.saturating_sub(1).min(63);
        let delay_ms = min_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Whether the given consecutive-failure count is past the cap.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_the_cap() {
        let policy = ReconnectPolicy::default();
        let expected_ms = [
            1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000,
        ];
        for (i, ms) in expected_ms.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(
                policy.delay_for_attempt(attempt),
                Duration::from_millis(*ms),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn attempt_eleven_is_exhausted() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(10));
        assert!(policy.is_exhausted(11));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_millis(30_000)
        );
    }
}
