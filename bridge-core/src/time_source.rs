//! Monotonic microsecond clock driving both periodic policies and the
//! dispatcher loop.
//!
//! Modelled as a single tagged enum rather than a trait object hierarchy
//! (see the Design Notes in the spec): the hot path dispatches on a
//! `match` instead of a vtable, and there is never a need to downcast a
//! `TimeSource` back to a concrete variant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic clock. All variants are thread-safe for concurrent reads;
/// `delta_us` is fixed at construction for every variant.
pub enum TimeSource {
    /// Wall-clock backed clock for production use.
    Real(RealTimeSource),
    /// Manually advanced clock for deterministic tests.
    Virtual(VirtualTimeSource),
    /// Contract-only clock reading from a host simulation (e.g. hakoniwa).
    /// The host supplies a callback; this crate never constructs one.
    External(ExternalTimeSource),
}

impl TimeSource {
    pub fn now_us(&self) -> u64 {
        match self {
            TimeSource::Real(t) => t.now_us(),
            TimeSource::Virtual(t) => t.now_us(),
            TimeSource::External(t) => t.now_us(),
        }
    }

    pub fn delta_us(&self) -> u64 {
        match self {
            TimeSource::Real(t) => t.delta_us,
            TimeSource::Virtual(t) => t.delta_us,
            TimeSource::External(t) => t.delta_us,
        }
    }

    pub fn sleep_delta(&self) {
        match self {
            TimeSource::Real(t) => t.sleep_delta(),
            TimeSource::Virtual(_) => {
                // no-op: virtual time only advances via `advance_us`.
            }
            TimeSource::External(_) => {
                // sleeping is the host simulation's responsibility.
            }
        }
    }

    /// Advance a `Virtual` clock by `us` microseconds. No-op (and logged)
    /// on any other variant; tests should construct a `Virtual` clock if
    /// they need this.
    pub fn advance_us(&self, us: u64) {
        match self {
            TimeSource::Virtual(t) => t.advance(us),
            _ => {
                tracing::warn!("advance_us called on a non-virtual time source, ignoring");
            }
        }
    }
}

/// Microseconds since a monotonic start epoch, advanced by the OS clock.
pub struct RealTimeSource {
    start: Instant,
    delta_us: u64,
}

impl RealTimeSource {
    pub fn new(delta_us: u64) -> Self {
        Self {
            start: Instant::now(),
            delta_us,
        }
    }

    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn sleep_delta(&self) {
        std::thread::sleep(std::time::Duration::from_micros(self.delta_us));
    }
}

/// An internally advanced counter, used by tests to drive Ticker/Throttle
/// policies deterministically without real sleeps.
pub struct VirtualTimeSource {
    now_us: AtomicU64,
    delta_us: u64,
}

impl VirtualTimeSource {
    pub fn new(delta_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(0),
            delta_us,
        }
    }

    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }

    /// Advance the virtual clock by `us` microseconds. Used by tests.
    pub fn advance(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::Relaxed);
    }
}

/// Reads time from a host simulation clock. Contract-only: the host is
/// responsible for keeping `source` up to date and for calling the
/// equivalent of `sleep_delta` on its own schedule.
pub struct ExternalTimeSource {
    source: Box<dyn Fn() -> u64 + Send + Sync>,
    delta_us: u64,
}

impl ExternalTimeSource {
    pub fn new(delta_us: u64, source: Box<dyn Fn() -> u64 + Send + Sync>) -> Self {
        Self { source, delta_us }
    }

    fn now_us(&self) -> u64 {
        (self.source)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_on_demand() {
        let ts = TimeSource::Virtual(VirtualTimeSource::new(1_000));
        assert_eq!(ts.now_us(), 0);
        ts.advance_us(5_000);
        assert_eq!(ts.now_us(), 5_000);
        assert_eq!(ts.delta_us(), 1_000);
    }

    #[test]
    fn virtual_clock_sleep_delta_is_noop() {
        let ts = TimeSource::Virtual(VirtualTimeSource::new(1_000));
        ts.sleep_delta();
        assert_eq!(ts.now_us(), 0);
    }

    #[test]
    fn real_clock_advances_on_its_own() {
        let ts = TimeSource::Real(RealTimeSource::new(1_000));
        let first = ts.now_us();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ts.now_us();
        assert!(second >= first);
    }
}
