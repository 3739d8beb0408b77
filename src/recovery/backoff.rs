//! Exponential Backoff
//!
//! `delay(n) = min(initial × multiplier^(n−1), cap)`, with optional additive
//! jitter. Attempt 1 of a retry loop is always immediate; attempt `k > 1`
//! waits `delay(k − 1)`.

use std::time::Duration;
use rand::Rng;

/// Backoff policy shared by the retry and reconnect paths.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor per attempt (≥ 1).
    pub multiplier: f64,
    /// Upper bound for any single delay (before jitter).
    pub max_delay: Duration,
    /// Fraction of the base delay added as random jitter, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(30_000),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter.
    pub fn exponential(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Same policy with jitter.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Same policy starting from another initial delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// `min(initial × multiplier^(n−1), cap)` for `n ≥ 1`, zero for `n = 0`.
    pub fn base_delay(&self, n: u32) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(n.saturating_sub(1).min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Base delay plus a random jitter in `[0, jitter × base]`.
    pub fn jittered_delay(&self, n: u32) -> Duration {
        let base = self.base_delay(n);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = (base.as_millis() as f64 * self.jitter) as u64;
        if spread == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(extra)
    }

    /// Wait before the given 1-based attempt (attempt 1 is immediate).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.jittered_delay(attempt - 1)
        }
    }

    /// Sum of the base delays before attempts `2..=attempts`.
    pub fn total_base_delay(&self, attempts: u32) -> Duration {
        (1..attempts).map(|n| self.base_delay(n)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (2..=5).map(|a| policy.delay_before(a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
        assert_eq!(policy.delay_before(1), Duration::ZERO);
    }

    #[test]
    fn test_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(6), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(60), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::default().with_jitter(0.25);
        for _ in 0..200 {
            let d = policy.jittered_delay(2).as_millis();
            assert!((2000..=2500).contains(&d), "{d}");
        }
    }

    #[test]
    fn test_total_base_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.total_base_delay(5), Duration::from_millis(15_000));
        assert_eq!(policy.total_base_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = BackoffPolicy::default().with_jitter(4.0);
        assert_eq!(policy.jitter, 1.0);
    }
}
