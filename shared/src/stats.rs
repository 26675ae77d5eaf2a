//! Per-connection statistics, scoped to the engine instance that owns
//! them and readable from any thread.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

const PING_WINDOW: i64 = 5;

#[derive(Debug, Default)]
struct RollingAverage {
    count: i64,
    accumulator: i64,
}

/// Counters and rolling averages for one client connection. Writers are
/// the engine's own threads; readers may be anywhere (UI, logging).
#[derive(Debug, Default)]
pub struct ConnectionStats {
    ping: Mutex<RollingAverage>,
    average_ping: AtomicI64,
    acks: AtomicU64,
    ack_misses: AtomicU64,
    baseline_repairs: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ping_time(&self, nanos: i64) {
        let mut ping = self.ping.lock();
        let size = ping.count.min(PING_WINDOW);
        ping.count += 1;
        ping.accumulator = (ping.accumulator * size + nanos) / (size + 1);
        self.average_ping.store(ping.accumulator, Ordering::Relaxed);
    }

    pub fn average_ping_time(&self) -> i64 {
        self.average_ping.load(Ordering::Relaxed)
    }

    pub fn increment_acks(&self) {
        self.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ack_misses(&self) {
        self.ack_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acks(&self) -> u64 {
        self.acks.load(Ordering::Relaxed)
    }

    /// Fraction of acks that matched no retained message, as a
    /// percentage. Stale and duplicate acks land here; a consistently
    /// high value means heavy loss or reordering.
    pub fn ack_miss_percent(&self) -> f64 {
        let total = self.acks.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let misses = self.ack_misses.load(Ordering::Relaxed);
        misses as f64 * 100.0 / total as f64
    }

    /// Counts initial baselines that arrived without a real id and were
    /// repaired from the current state. Diagnostic for severe ack lag.
    pub fn increment_baseline_repairs(&self) {
        self.baseline_repairs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn baseline_repairs(&self) -> u64 {
        self.baseline_repairs.load(Ordering::Relaxed)
    }
}
