//! Exponential backoff with additive jitter for the scheduler's fetch retries.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Jitter is drawn from `[0, jitter_ratio * base * 2^n)`. Values are
    /// clamped below 1 so consecutive delays keep strictly increasing.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.1,
        }
    }
}

/// Failure counter producing the delay before the next retry.
///
/// The counter survives across scheduler cycles and only [`Backoff::reset`]
/// (called after a successful fetch) brings it back to zero.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns how long to wait before retrying.
    ///
    /// `hint` is an upstream reset hint (rate limiting); it can raise the
    /// delay but never beyond `max_delay`.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Duration {
        let exponent = self.failures.min(31);
        self.failures = self.failures.saturating_add(1);

        let scaled = self.policy.base.saturating_mul(1u32 << exponent);
        let ratio = self.policy.jitter_ratio.clamp(0.0, 0.99);
        let jitter = if ratio > 0.0 {
            scaled.mul_f64(rand::rng().random_range(0.0..ratio))
        } else {
            Duration::ZERO
        };

        let delay = scaled.saturating_add(jitter);
        let delay = match hint {
            Some(hint) => delay.max(hint),
            None => delay,
        };
        delay.min(self.policy.max_delay)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter_ratio: f64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio,
        }
    }

    #[test]
    fn doubles_without_jitter() {
        let mut backoff = Backoff::new(policy(0.0));
        let delays: Vec<u64> = (0..4).map(|_| backoff.next_delay(None).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn strictly_increases_with_jitter_until_cap() {
        for _ in 0..50 {
            let mut backoff = Backoff::new(policy(0.5));
            let mut last = Duration::ZERO;
            for _ in 0..6 {
                let delay = backoff.next_delay(None);
                assert!(delay > last, "{delay:?} not above {last:?}");
                last = delay;
            }
            // base * 2^6 = 64s is past the cap.
            assert_eq!(backoff.next_delay(None), Duration::from_secs(60));
            assert_eq!(backoff.next_delay(None), Duration::from_secs(60));
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(policy(0.0));
        backoff.next_delay(None);
        backoff.next_delay(None);
        assert_eq!(backoff.failures(), 2);
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(None), Duration::from_secs(1));
    }

    #[test]
    fn hint_raises_delay_but_respects_cap() {
        let mut backoff = Backoff::new(policy(0.0));
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(30))), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(Some(Duration::from_secs(3600))), Duration::from_secs(60));
        // A hint shorter than the computed delay does not lower it.
        assert_eq!(backoff.next_delay(Some(Duration::from_millis(10))), Duration::from_secs(4));
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let mut backoff = Backoff::new(policy(0.5));
        for _ in 0..100 {
            assert!(backoff.next_delay(None) <= Duration::from_secs(60));
        }
    }
}
