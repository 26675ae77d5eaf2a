//! Time sources. The engine assumes a monotonic nanosecond clock; the
//! client's synchronized view of server time lives in the client crate.

use std::time::Instant;

/// A monotonic nanosecond clock.
pub trait TimeSource: Send + Sync {
    fn time(&self) -> i64;
}

/// A time source slaved to a remote clock: exposes the measured drift
/// and a configurable interpolation offset.
pub trait SynchedTimeSource: TimeSource {
    /// Nanoseconds to add to the local clock to approximate the remote
    /// one.
    fn drift(&self) -> i64;

    /// The user-chosen bias applied on top of the drift, normally
    /// negative to create a receive-side interpolation window.
    fn offset(&self) -> i64;
}

/// The process-local monotonic clock, in nanoseconds since creation.
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn time(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::{SystemTimeSource, TimeSource};

    #[test]
    fn system_time_is_monotonic() {
        let clock = SystemTimeSource::new();
        let a = clock.time();
        let b = clock.time();
        assert!(b >= a);
    }
}
