//! Run-scoped request pacing and rate-limit backoff.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::time::Duration;

/// Length of the provider's billing month used to spread a monthly quota.
const QUOTA_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Global pacing gate awaited before every provider call.
///
/// One instance is created per run and shared by every concurrent day-walk, so
/// the combined request rate stays under the provider limit.
pub struct RequestPacer {
    limiter: Option<DefaultDirectRateLimiter>,
    min_interval: Duration,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            limiter: Quota::with_period(min_interval).map(RateLimiter::direct),
            min_interval,
        }
    }

    /// Pacer that never waits.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request slot opens.
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Spread a monthly request quota evenly across the month.
pub fn min_interval_for_quota(monthly_quota: u32) -> Duration {
    if monthly_quota == 0 {
        return Duration::ZERO;
    }
    QUOTA_PERIOD / monthly_quota
}

/// Exponential backoff for consecutive rate-limit responses on one chain.
///
/// Delays go `base, 2*base, 4*base, ...` and never exceed `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    consecutive: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            consecutive: 0,
        }
    }

    /// Delay to wait after the next rate-limit hit.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.consecutive).unwrap_or(u32::MAX);
        self.consecutive = self.consecutive.saturating_add(1);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let cap = Duration::from_millis(7_500);
        let mut backoff = Backoff::new(Duration::from_millis(300), cap);
        let mut last = Duration::ZERO;
        for _ in 0..64 {
            let delay = backoff.next_delay();
            assert!(delay >= last);
            assert!(delay <= cap);
            last = delay;
        }
        assert_eq!(last, cap);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.consecutive(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_min_interval_for_quota() {
        assert_eq!(min_interval_for_quota(0), Duration::ZERO);
        // 20k requests over 30 days
        assert_eq!(min_interval_for_quota(20_000), Duration::from_millis(129_600));
    }

    #[tokio::test]
    async fn test_unpaced_never_waits() {
        let pacer = RequestPacer::unpaced();
        for _ in 0..100 {
            pacer.until_ready().await;
        }
        assert_eq!(pacer.min_interval(), Duration::ZERO);
    }

    #[test]
    fn test_first_slot_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_secs(3600));
        let started = std::time::Instant::now();
        tokio_test::block_on(pacer.until_ready());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pacer.min_interval(), Duration::from_secs(3600));
    }
}
