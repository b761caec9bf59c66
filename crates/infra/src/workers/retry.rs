//! Backoff for transient failures while handling one delivery.

use std::time::Duration;

/// Capped exponential backoff: retry `n` waits `base * 2^(n-1)`, at most
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Delay before retry number `retry` (1-based). Never overflows.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let Some(doublings) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether the budget allows another retry after `retries_done`.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn delays_double_until_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(200), Duration::from_secs(1));
        let delays: Vec<u64> = (0..=5)
            .map(|n| policy.delay_for_retry(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn budget_counts_retries_not_attempts() {
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::ZERO);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).should_retry(0));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn delay_stays_between_base_and_cap(retry in 1u32..200, base in 0u64..5_000, cap in 0u64..120_000) {
            let policy = RetryPolicy::new(10, Duration::from_millis(base), Duration::from_millis(cap));
            let delay = policy.delay_for_retry(retry);
            prop_assert!(delay >= policy.base_delay);
            prop_assert!(delay <= policy.max_delay);
        }
    }
}
