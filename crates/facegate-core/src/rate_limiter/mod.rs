//! Per-account request pacing for the remote provider.
//!
//! Every caller reserves send slots against one ledger per provider account.
//! The ledger is owned by a single coordinator task ([`CoordinatorHandle`]);
//! gateway instances on other hosts reach the same coordinator over HTTP
//! ([`HttpRateLimiter`]), so reservations stay linearizable across processes.

mod coordinator;
mod http;

pub use coordinator::{spawn_coordinator, CoordinatorHandle, CoordinatorRegistry, MAX_ACCOUNT_LEN};
pub use http::HttpRateLimiter;

use crate::error::FaceResult;
use async_trait::async_trait;
use std::time::Duration;

/// Fraction of the configured TPS actually used.
const SAFETY_MARGIN: f64 = 0.9;

/// Milliseconds between consecutive calls for `tps` with a 10% safety margin.
pub fn interval_for_tps(tps: f64) -> u64 {
    let effective = (tps * SAFETY_MARGIN).max(f64::MIN_POSITIVE);
    ((1000.0 / effective).ceil() as u64).max(1)
}

/// Outcome of a reservation: wait `delay`, then space batch calls by `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub delay: Duration,
    pub interval: Duration,
}

impl Reservation {
    /// When the `index`-th call (0-based) of the batch may be sent, relative to now.
    pub fn slot_delay(&self, index: u32) -> Duration {
        self.delay + self.interval * index
    }
}

/// Snapshot of a coordinator's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub interval_ms: u64,
    /// Time until the next free slot.
    pub pending_ms: u64,
    pub throttle_events: u64,
    /// Total time added to the ledger by throttle reports.
    pub throttle_penalty_ms: u64,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Reserve `count` sequential slots. A count of 0 reserves one.
    async fn reserve_batch(&self, count: u32) -> FaceResult<Reservation>;

    /// Push the next free slot to at least `now + extra` for every caller.
    async fn report_throttle(&self, extra: Duration) -> FaceResult<()>;
}

/// Throughput ledger over a millisecond clock supplied by the owner.
#[derive(Debug, Clone)]
pub struct RateLedger {
    interval_ms: u64,
    next_available_at: u64,
    throttle_events: u64,
    throttle_penalty_ms: u64,
}

impl RateLedger {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_available_at: 0,
            throttle_events: 0,
            throttle_penalty_ms: 0,
        }
    }

    pub fn for_tps(tps: f64) -> Self {
        Self::new(interval_for_tps(tps))
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn reserve(&mut self, now: u64, count: u32) -> Reservation {
        let count = u64::from(count.max(1));
        let start = now.max(self.next_available_at);
        self.next_available_at = start.saturating_add(count.saturating_mul(self.interval_ms));
        Reservation {
            delay: Duration::from_millis(start - now),
            interval: Duration::from_millis(self.interval_ms),
        }
    }

    pub fn throttle(&mut self, now: u64, extra_ms: u64) {
        let target = now.saturating_add(extra_ms);
        self.throttle_events += 1;
        if target > self.next_available_at {
            self.throttle_penalty_ms += target - self.next_available_at.max(now);
            self.next_available_at = target;
        }
    }

    pub fn stats(&self, now: u64) -> CoordinatorStats {
        CoordinatorStats {
            interval_ms: self.interval_ms,
            pending_ms: self.next_available_at.saturating_sub(now),
            throttle_events: self.throttle_events,
            throttle_penalty_ms: self.throttle_penalty_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_for_30_tps() {
        let interval = interval_for_tps(30.0);
        assert!((33..=40).contains(&interval), "interval {interval}");
        assert_eq!(interval, 38);
    }

    #[test]
    fn test_interval_never_zero() {
        assert_eq!(interval_for_tps(1e9), 1);
        assert!(interval_for_tps(0.0) > 0);
    }

    #[test]
    fn test_cold_ledger_has_no_delay() {
        let mut ledger = RateLedger::new(38);
        let r = ledger.reserve(10_000, 5);
        assert_eq!(r.delay, Duration::ZERO);
        assert_eq!(r.interval, Duration::from_millis(38));
    }

    #[test]
    fn test_back_to_back_reservations_queue() {
        let mut ledger = RateLedger::new(38);
        ledger.reserve(1_000, 5);
        let r = ledger.reserve(1_000, 5);
        assert_eq!(r.delay, Duration::from_millis(5 * 38));
        let r = ledger.reserve(1_010, 1);
        assert_eq!(r.delay, Duration::from_millis(10 * 38 - 10));
    }

    #[test]
    fn test_idle_ledger_catches_up() {
        let mut ledger = RateLedger::new(38);
        ledger.reserve(0, 3);
        let r = ledger.reserve(500, 1);
        assert_eq!(r.delay, Duration::ZERO);
    }

    #[test]
    fn test_zero_count_reserves_one_slot() {
        let mut ledger = RateLedger::new(20);
        ledger.reserve(0, 0);
        assert_eq!(ledger.reserve(0, 1).delay, Duration::from_millis(20));
    }

    #[test]
    fn test_throttle_extends_window() {
        let mut ledger = RateLedger::new(38);
        ledger.throttle(100, 2_000);
        let r = ledger.reserve(100, 1);
        assert!(r.delay >= Duration::from_millis(2_000));

        let stats = ledger.stats(100);
        assert_eq!(stats.throttle_events, 1);
        assert_eq!(stats.throttle_penalty_ms, 2_000);
        assert_eq!(stats.pending_ms, 2_038);
    }

    #[test]
    fn test_throttle_never_shortens_window() {
        let mut ledger = RateLedger::new(100);
        ledger.reserve(0, 50); // next slot at 5000
        ledger.throttle(0, 1_000);
        assert_eq!(ledger.stats(0).pending_ms, 5_000);
        assert_eq!(ledger.stats(0).throttle_penalty_ms, 0);
        assert_eq!(ledger.stats(0).throttle_events, 1);
    }

    #[test]
    fn test_slot_delay() {
        let r = Reservation {
            delay: Duration::from_millis(100),
            interval: Duration::from_millis(38),
        };
        assert_eq!(r.slot_delay(0), Duration::from_millis(100));
        assert_eq!(r.slot_delay(3), Duration::from_millis(214));
    }
}
