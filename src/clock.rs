// SPDX-License-Identifier: GPL-3.0-only
//! Abstract monotonic clock, for testability.
//!
//! Grounded in `scottlamb-moonfire-nvr`'s `src/clock.rs` (`trait Clock { fn
//! get_time(&self) -> Timespec; fn sleep(...); }` with `RealClock` and
//! `SimulatedClock`), adapted to a single monotonic-nanoseconds accessor: the
//! core loop never sleeps, it waits on a condition variable with a deadline,
//! so only "what time is it" needs to be abstracted, not "sleep for this
//! long".

use std::sync::Mutex;
use std::time::Instant;

/// Abstract interface to the passage of time.
pub trait Clock: Send + Sync {
    /// Current monotonic time, in nanoseconds, relative to an arbitrary
    /// epoch fixed at clock construction.
    fn now_ns(&self) -> u64;
}

/// Real wall/monotonic clock backed by [`std::time::Instant`].
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Deterministic clock for tests: advances only when told to.
///
/// Used by this crate's own scenario tests to drive deterministic,
/// reproducible timing without depending on wall-clock scheduling.
pub struct SimulatedClock(Mutex<u64>);

impl SimulatedClock {
    pub fn new() -> Self {
        Self(Mutex::new(0))
    }

    /// Advance the clock by `delta_ns` nanoseconds.
    pub fn advance(&self, delta_ns: u64) {
        let mut t = self.0.lock().unwrap();
        *t += delta_ns;
    }

    /// Advance the clock to an absolute point in time, in milliseconds since
    /// construction. Convenience for scenario tests written in terms of
    /// "advance to t=1501ms".
    pub fn advance_to_ms(&self, target_ms: u64) {
        let target_ns = target_ms * 1_000_000;
        let mut t = self.0.lock().unwrap();
        assert!(
            target_ns >= *t,
            "SimulatedClock can only move forward (requested {target_ns}, currently {})",
            *t
        );
        *t = target_ns;
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn now_ns(&self) -> u64 {
        *self.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_starts_at_zero_and_advances() {
        let clock = SimulatedClock::new();
        assert_eq!(clock.now_ns(), 0);
        clock.advance(500);
        assert_eq!(clock.now_ns(), 500);
        clock.advance_to_ms(2);
        assert_eq!(clock.now_ns(), 2_000_000);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
