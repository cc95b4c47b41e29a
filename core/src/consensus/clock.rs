//! A small clock seam so view-change timeout tests can advance time by hand
//! instead of sleeping for real.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A timer whose "has the deadline passed" check is driven by a `Clock`.
/// `reset` (re)arms the deadline `timeout` past whatever `now()` returns;
/// `stop` disarms it so `expired` stays false until the next `reset`.
pub struct Deadline {
    started_at: std::sync::Mutex<Option<Instant>>,
    timeout: Duration,
}

impl Deadline {
    pub fn new(clock: &dyn Clock, timeout: Duration) -> Self {
        Self {
            started_at: std::sync::Mutex::new(Some(clock.now())),
            timeout,
        }
    }

    pub fn reset(&self, clock: &dyn Clock) {
        *self.started_at.lock().unwrap() = Some(clock.now());
    }

    /// Disarm the deadline. An idle replica with nothing pending should not
    /// spuriously time out; the deadline is only meaningful while something
    /// is actually in flight.
    pub fn stop(&self) {
        *self.started_at.lock().unwrap() = None;
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        match *self.started_at.lock().unwrap() {
            Some(started_at) => clock.now().duration_since(started_at) >= self.timeout,
            None => false,
        }
    }
}

/// A fake clock for tests: `now()` returns a fixed `Instant` that only
/// advances when `advance` is called.
pub struct FakeClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}
