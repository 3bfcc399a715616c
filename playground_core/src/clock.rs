//! Monotonic time source.
//!
//! Every scheduling decision (throttle gate, frame budget, debounce
//! deadline) reads time through [`Clock`] so hosts and tests can drive
//! it deterministically.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds elapsed since the clock's origin.
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a host can hand one copy to
/// the coordinator and keep another to advance it.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms.max(0.0));
    }

    /// Sets the absolute time. Going backwards is ignored.
    pub fn set(&self, ms: f64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}
