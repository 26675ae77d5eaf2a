//! The client's synchronized view of server time: local clock plus a
//! slowly-adapting drift, biased into the past to leave an
//! interpolation window.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use zonecast_shared::{ObjectStateMessage, SynchedTimeSource, SystemTimeSource, TimeSource};

/// Default bias: 100 ms in the past.
pub const DEFAULT_OFFSET: i64 = -100 * 1_000_000;

const DRIFT_WINDOW_MAX: i64 = 100;
const DIVERGENCE_WARN_NANOS: i64 = 1_000_000_000;

#[derive(Debug, Default)]
struct DriftWindow {
    last_server_time: i64,
    window_size: i64,
}

/// Tracks the offset between the local clock and the server's frame
/// timestamps as a running average over up to 100 samples, so the
/// drift varies slowly. `time` never goes backwards across calls.
pub struct RemoteTimeSource {
    local: Arc<dyn TimeSource>,
    offset: AtomicI64,
    drift: AtomicI64,
    initialized: AtomicBool,
    last_time: AtomicI64,
    window: Mutex<DriftWindow>,
}

impl RemoteTimeSource {
    pub fn new() -> Self {
        Self::with_offset(DEFAULT_OFFSET)
    }

    pub fn with_offset(offset: i64) -> Self {
        Self::with_clock(offset, Arc::new(SystemTimeSource::new()))
    }

    pub fn with_clock(offset: i64, local: Arc<dyn TimeSource>) -> Self {
        Self {
            local,
            offset: AtomicI64::new(offset),
            drift: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
            last_time: AtomicI64::new(0),
            window: Mutex::new(DriftWindow::default()),
        }
    }

    pub fn set_offset(&self, offset: i64) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    /// Feeds one inbound message's send timestamp into the drift
    /// average. Only new high-water times count; retransmits and
    /// reordered messages are ignored.
    pub fn update(&self, message: &ObjectStateMessage) {
        let mut window = self.window.lock();
        if message.time <= window.last_server_time {
            return;
        }
        window.last_server_time = message.time;

        let local = self.local.time();
        // What we have to add to our clock to get server time.
        let delta = message.time - local;

        let drift = self.drift.load(Ordering::Relaxed);
        if self.initialized.load(Ordering::Relaxed)
            && (delta - drift).abs() > DIVERGENCE_WARN_NANOS
        {
            warn!(
                "server time diverges from local clock by {} ms",
                (delta - drift) / 1_000_000
            );
        }

        let new_drift = (delta + drift * window.window_size) / (window.window_size + 1);
        debug!("time delta: {delta}, drift: {new_drift}");
        self.drift.store(new_drift, Ordering::Relaxed);
        if window.window_size < DRIFT_WINDOW_MAX {
            window.window_size += 1;
        }

        self.initialized.store(true, Ordering::Relaxed);
    }
}

impl Default for RemoteTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for RemoteTimeSource {
    fn time(&self) -> i64 {
        if !self.initialized.load(Ordering::Relaxed) {
            return 0;
        }
        let t = self.local.time()
            + self.drift.load(Ordering::Relaxed)
            + self.offset.load(Ordering::Relaxed);
        // Monotonic clamp: never step backwards, even while the drift
        // adapts downward.
        let previous = self.last_time.fetch_max(t, Ordering::AcqRel);
        t.max(previous)
    }
}

impl SynchedTimeSource for RemoteTimeSource {
    fn drift(&self) -> i64 {
        self.drift.load(Ordering::Relaxed)
    }

    fn offset(&self) -> i64 {
        self.offset.load(Ordering::Relaxed)
    }
}
