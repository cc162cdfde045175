//! Exponential backoff with full jitter for transient retries.

use std::time::Duration;

use rand::Rng;

/// Base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

/// Ceiling on any single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Retry schedule for transient failures.
///
/// The sleep before retry `n` is drawn uniformly from
/// `[0, min(cap, base * 2^n)]` (full jitter). A server-provided `Retry-After`
/// hint acts as a floor, still capped.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_MAX_DELAY,
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Uncapped exponential ceiling for the given attempt (0-indexed).
    fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Compute the sleep before retrying `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let ceiling = self.ceiling(attempt);
        let jittered = Duration::from_millis(
            rand::thread_rng().gen_range(0..=ceiling.as_millis().max(1) as u64),
        );
        match retry_after {
            Some(hint) => jittered.max(hint.min(self.cap)),
            None => jittered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        let policy = BackoffPolicy::default();
        for attempt in 0..10 {
            for _ in 0..50 {
                assert!(policy.delay(attempt, None) <= policy.cap);
            }
        }
    }

    #[test]
    fn retry_after_hint_is_a_floor() {
        let policy = BackoffPolicy::default();
        let hint = Duration::from_secs(2);
        for _ in 0..50 {
            assert!(policy.delay(0, Some(hint)) >= hint);
        }
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = BackoffPolicy::default();
        let hint = Duration::from_secs(60);
        for _ in 0..50 {
            assert!(policy.delay(0, Some(hint)) <= policy.cap);
        }
    }

    #[test]
    fn ceiling_grows_exponentially_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.ceiling(0), Duration::from_millis(250));
        assert_eq!(policy.ceiling(1), Duration::from_millis(500));
        assert_eq!(policy.ceiling(2), Duration::from_millis(1000));
        assert_eq!(policy.ceiling(5), Duration::from_secs(5));
        assert_eq!(policy.ceiling(30), Duration::from_secs(5));
    }
}
