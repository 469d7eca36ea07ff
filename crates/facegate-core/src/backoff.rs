//! Jittered exponential backoff.
//!
//! Second-scale policies (queue redelivery) spread ±10% around the capped
//! delay. The millisecond-scale policy (in-call retries against sub-second
//! rate windows) always adds up to one second of jitter.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// `capped * factor * (u - 0.5)`; 0.2 yields ±10% of the capped delay.
    Proportional(f64),
    /// `u * span`, always added.
    Additive(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Jitter,
    /// Delays are rounded to a multiple of this.
    pub granularity: Duration,
}

impl BackoffPolicy {
    /// Generic retries: 2s base, 300s cap, ±10% jitter, whole seconds.
    pub const fn generic() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
            jitter: Jitter::Proportional(0.2),
            granularity: Duration::from_secs(1),
        }
    }

    /// Throttling retries need longer recovery: 5s base, 300s cap.
    pub const fn throttle() -> Self {
        Self {
            base: Duration::from_secs(5),
            ..Self::generic()
        }
    }

    /// Sub-second rate windows: 1000ms base, 30s cap, +[0, 1000ms) jitter.
    pub const fn fast() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            jitter: Jitter::Additive(Duration::from_millis(1000)),
            granularity: Duration::from_millis(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::thread_rng().gen::<f64>())
    }

    /// Same as [`delay`](Self::delay) with an explicit uniform sample in [0, 1).
    pub fn delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let exponential = self.base.as_secs_f64() * 2f64.powi(exponent);
        let capped = exponential.min(self.max.as_secs_f64());

        let jitter = match self.jitter {
            Jitter::Proportional(factor) => capped * factor * (sample - 0.5),
            Jitter::Additive(span) => span.as_secs_f64() * sample,
        };

        let raw = (capped + jitter).max(0.0);
        let unit_nanos = self.granularity.as_nanos() as u64;
        if unit_nanos == 0 {
            return Duration::from_secs_f64(raw);
        }
        let units = (raw / self.granularity.as_secs_f64()).round() as u64;
        Duration::from_nanos(unit_nanos.saturating_mul(units))
    }
}

/// Generic retry delay for `attempt`.
pub fn retry_delay(attempt: u32) -> Duration {
    BackoffPolicy::generic().delay(attempt)
}

/// Throttle-specific retry delay for `attempt`.
pub fn throttle_delay(attempt: u32) -> Duration {
    BackoffPolicy::throttle().delay(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_within_jitter_band() {
        for _ in 0..200 {
            let d = BackoffPolicy::generic().delay(1).as_secs_f64();
            assert!((1.8..=2.2).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn test_tenth_attempt_capped() {
        for _ in 0..200 {
            let d = BackoffPolicy::generic().delay(10).as_secs_f64();
            assert!((270.0..=330.0).contains(&d), "delay {d}");
        }
        // Zero jitter (sample at the midpoint) lands exactly on the cap.
        assert_eq!(BackoffPolicy::generic().delay_with(10, 0.5), Duration::from_secs(300));
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let p = BackoffPolicy::generic();
        let delays: Vec<u64> = (1..=5).map(|a| p.delay_with(a, 0.5).as_secs()).collect();
        assert_eq!(delays, [2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_throttle_policy_uses_longer_base() {
        let p = BackoffPolicy::throttle();
        assert_eq!(p.delay_with(1, 0.5), Duration::from_secs(5));
        assert_eq!(p.delay_with(2, 0.5), Duration::from_secs(10));
        assert_eq!(p.delay_with(20, 0.5), Duration::from_secs(300));
    }

    #[test]
    fn test_proportional_jitter_extremes() {
        let p = BackoffPolicy::generic();
        // 32s capped, ±10% → 28.8 rounds to 29, 35.2 rounds to 35
        assert_eq!(p.delay_with(5, 0.0), Duration::from_secs(29));
        assert_eq!(p.delay_with(5, 0.999_999), Duration::from_secs(35));
    }

    #[test]
    fn test_fast_policy_jitter_is_additive() {
        let p = BackoffPolicy::fast();
        assert_eq!(p.delay_with(1, 0.0), Duration::from_millis(1000));
        assert_eq!(p.delay_with(1, 0.5), Duration::from_millis(1500));
        assert_eq!(p.delay_with(3, 0.0), Duration::from_millis(4000));
        // capped at 30s before jitter
        assert_eq!(p.delay_with(10, 0.25), Duration::from_millis(30_250));
        for _ in 0..200 {
            let d = p.delay(1);
            assert!(d >= Duration::from_millis(1000) && d < Duration::from_millis(2001), "{d:?}");
        }
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert_eq!(BackoffPolicy::generic().delay_with(0, 0.5), Duration::from_secs(2));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        assert_eq!(BackoffPolicy::generic().delay_with(u32::MAX, 0.5), Duration::from_secs(300));
    }
}
