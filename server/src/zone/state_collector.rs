//! The background ticker that purges the zone manager and fans the
//! resulting frames out to the registered per-client listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use log::{error, info, trace};
use parking_lot::Mutex;
use zonecast_shared::ZoneKey;

use crate::zone::{StateBlock, StateFrame, ZoneManager};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Receives the frame stream for the zones it watches. Implementations
/// are driven from the collector thread; inbound acknowledgements arrive
/// on transport threads, so implementations synchronize internally.
pub trait StateListener: Send + Sync {
    /// Whether the listener's zone interest changed since the last
    /// frame; if so the collector re-indexes it before delivering.
    fn has_changed_zones(&self) -> bool;
    fn entered_zones(&self) -> Vec<ZoneKey>;
    fn exited_zones(&self) -> Vec<ZoneKey>;

    /// Brackets one purge cycle; everything between the pair belongs to
    /// a single collection.
    fn begin_frame_block(&self);
    fn end_frame_block(&self);

    /// Brackets one frame time; all `state_changed` calls in between
    /// pertain to `time`.
    fn begin_frame(&self, time: i64);
    fn end_frame(&self, time: i64);

    fn state_changed(&self, block: &StateBlock);
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    /// Nanoseconds between collections; 0 selects the 20 Hz default.
    pub collection_period: i64,
    /// Milliseconds slept between period checks; -1 busy-waits.
    pub idle_sleep_millis: i64,
}

impl CollectorConfig {
    pub const DEFAULT_PERIOD: i64 = NANOS_PER_SEC / 20;
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collection_period: Self::DEFAULT_PERIOD,
            idle_sleep_millis: 1,
        }
    }
}

struct CollectorInner {
    zones: Arc<ZoneManager>,
    go: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn StateListener>>>,
    removed: SegQueue<Arc<dyn StateListener>>,
    // Zone-to-watchers index, touched only by the collecting thread.
    zone_listeners: Mutex<HashMap<ZoneKey, Vec<Arc<dyn StateListener>>>>,
    config: CollectorConfig,
}

impl CollectorInner {
    fn watch(&self, key: ZoneKey, listener: &Arc<dyn StateListener>) {
        trace!("watch({key})");
        self.zone_listeners
            .lock()
            .entry(key)
            .or_default()
            .push(Arc::clone(listener));
    }

    fn unwatch(&self, key: &ZoneKey, listener: &Arc<dyn StateListener>) {
        trace!("unwatch({key})");
        if let Some(list) = self.zone_listeners.lock().get_mut(key) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn unwatch_all(&self, listener: &Arc<dyn StateListener>) {
        trace!("unwatch_all()");
        for list in self.zone_listeners.lock().values_mut() {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    fn publish(&self, block: &StateBlock) {
        let watchers: Vec<Arc<dyn StateListener>> = match self.zone_listeners.lock().get(block.zone())
        {
            Some(list) => list.clone(),
            None => return,
        };
        for listener in watchers {
            listener.state_changed(block);
        }
    }

    fn publish_frame(&self, frame: &StateFrame) {
        trace!("publish_frame()");

        let listeners: Vec<Arc<dyn StateListener>> = self.listeners.lock().clone();
        for listener in &listeners {
            if listener.has_changed_zones() {
                for key in listener.exited_zones() {
                    self.unwatch(&key, listener);
                }
                for key in listener.entered_zones() {
                    self.watch(key, listener);
                }
            }
            listener.begin_frame(frame.time());
        }

        for block in frame.blocks() {
            self.publish(block);
        }

        for listener in &listeners {
            listener.end_frame(frame.time());
        }
    }

    fn collect(&self) {
        trace!("collect()");

        // Purge pending listener removals before touching the zones.
        while let Some(listener) = self.removed.pop() {
            self.unwatch_all(&listener);
        }

        let frames = self.zones.purge_state();

        let listeners: Vec<Arc<dyn StateListener>> = self.listeners.lock().clone();
        for listener in &listeners {
            listener.begin_frame_block();
        }

        for frame in frames.iter().flatten() {
            self.publish_frame(frame);
        }

        for listener in &listeners {
            listener.end_frame_block();
        }
    }

    fn run(&self) {
        let mut last_time = Instant::now();
        while self.go.load(Ordering::Acquire) {
            let elapsed = last_time.elapsed().as_nanos() as i64;
            if elapsed >= self.config.collection_period {
                last_time = Instant::now();
                self.collect();
                // Process again immediately if another period has
                // already elapsed.
                continue;
            }

            if self.config.idle_sleep_millis > 0 {
                std::thread::sleep(Duration::from_millis(self.config.idle_sleep_millis as u64));
            }
        }
    }
}

/// Owns the collection thread. Listeners can be added and removed from
/// any thread; delivery happens on the collector thread.
pub struct StateCollector {
    inner: Arc<CollectorInner>,
    runner: Option<JoinHandle<()>>,
}

impl StateCollector {
    pub fn new(zones: Arc<ZoneManager>) -> Self {
        Self::with_config(zones, CollectorConfig::default())
    }

    pub fn with_config(zones: Arc<ZoneManager>, mut config: CollectorConfig) -> Self {
        if config.collection_period == 0 {
            config.collection_period = CollectorConfig::DEFAULT_PERIOD;
        }
        Self {
            inner: Arc::new(CollectorInner {
                zones,
                go: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
                removed: SegQueue::new(),
                zone_listeners: Mutex::new(HashMap::new()),
                config,
            }),
            runner: None,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.inner.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StateListener>) {
        self.inner
            .listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
        self.inner.removed.push(Arc::clone(listener));
    }

    /// Runs one collection cycle on the calling thread. Tests and
    /// manually-driven servers use this instead of `start`.
    pub fn collect_once(&self) {
        if !self.inner.zones.collect_history() {
            self.inner.zones.set_collect_history(true);
        }
        self.inner.collect();
    }

    /// Starts the collection thread and enables history collection on
    /// the manager.
    pub fn start(&mut self) {
        info!("starting state collector");
        if self.runner.is_some() {
            return;
        }
        self.inner.zones.set_collect_history(true);
        self.inner.go.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("state-collector".into())
            .spawn(move || inner.run())
            .expect("spawn state collector thread");
        self.runner = Some(handle);
    }

    /// Stops the thread, joins it, and disables history collection so
    /// the manager stops accumulating frames.
    pub fn shutdown(&mut self) {
        info!("shutting down state collector");
        self.inner.go.store(false, Ordering::Release);
        if let Some(handle) = self.runner.take() {
            if handle.join().is_err() {
                error!("state collector thread panicked");
            }
        }
        self.inner.zones.set_collect_history(false);
    }
}

impl Drop for StateCollector {
    fn drop(&mut self) {
        if self.runner.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use zonecast_shared::{Aabb, Quatd, Vec3d, ZoneGrid};

    #[derive(Default)]
    struct Events {
        frames: Vec<i64>,
        blocks: usize,
        frame_blocks: usize,
    }

    struct RecordingListener {
        watch: Vec<ZoneKey>,
        changed: AtomicBool,
        events: PlMutex<Events>,
    }

    impl RecordingListener {
        fn new(watch: Vec<ZoneKey>) -> Self {
            Self {
                watch,
                changed: AtomicBool::new(true),
                events: PlMutex::new(Events::default()),
            }
        }
    }

    impl StateListener for RecordingListener {
        fn has_changed_zones(&self) -> bool {
            self.changed.swap(false, Ordering::AcqRel)
        }

        fn entered_zones(&self) -> Vec<ZoneKey> {
            self.watch.clone()
        }

        fn exited_zones(&self) -> Vec<ZoneKey> {
            Vec::new()
        }

        fn begin_frame_block(&self) {
            self.events.lock().frame_blocks += 1;
        }

        fn end_frame_block(&self) {}

        fn begin_frame(&self, time: i64) {
            self.events.lock().frames.push(time);
        }

        fn end_frame(&self, _time: i64) {}

        fn state_changed(&self, _block: &StateBlock) {
            self.events.lock().blocks += 1;
        }
    }

    #[test]
    fn frames_are_delivered_to_watching_listeners() {
        let grid = ZoneGrid::cube(32);
        let zones = Arc::new(ZoneManager::new(grid));
        let collector = StateCollector::new(Arc::clone(&zones));
        zones.set_collect_history(true);

        let key = ZoneKey::new(grid, 0, 0, 0);
        let listener = Arc::new(RecordingListener::new(vec![key]));
        collector.add_listener(listener.clone() as Arc<dyn StateListener>);

        zones.begin_update(100);
        zones.update_entity(
            1,
            Vec3d::new(5.0, 5.0, 5.0),
            Quatd::IDENTITY,
            &Aabb::around(Vec3d::new(5.0, 5.0, 5.0), 1.0),
        );
        zones.end_update();

        collector.collect_once();

        let events = listener.events.lock();
        assert_eq!(events.frames, vec![100]);
        assert_eq!(events.blocks, 1);
        assert_eq!(events.frame_blocks, 1);
    }

    #[test]
    fn unwatched_zones_are_not_delivered() {
        let grid = ZoneGrid::cube(32);
        let zones = Arc::new(ZoneManager::new(grid));
        let collector = StateCollector::new(Arc::clone(&zones));
        zones.set_collect_history(true);

        // Watching a zone far from the action.
        let key = ZoneKey::new(grid, 50, 0, 0);
        let listener = Arc::new(RecordingListener::new(vec![key]));
        collector.add_listener(listener.clone() as Arc<dyn StateListener>);

        zones.begin_update(100);
        zones.update_entity(
            1,
            Vec3d::new(5.0, 5.0, 5.0),
            Quatd::IDENTITY,
            &Aabb::around(Vec3d::new(5.0, 5.0, 5.0), 1.0),
        );
        zones.end_update();

        collector.collect_once();

        let events = listener.events.lock();
        // Frame lifecycle still runs, but no blocks are delivered.
        assert_eq!(events.frames, vec![100]);
        assert_eq!(events.blocks, 0);
    }

    #[test]
    fn collector_thread_delivers_and_shuts_down_cleanly() {
        let grid = ZoneGrid::cube(32);
        let zones = Arc::new(ZoneManager::new(grid));
        let mut collector =
            StateCollector::with_config(Arc::clone(&zones), CollectorConfig::default());

        let key = ZoneKey::new(grid, 0, 0, 0);
        let listener = Arc::new(RecordingListener::new(vec![key]));
        collector.add_listener(listener.clone() as Arc<dyn StateListener>);

        collector.start();
        assert!(zones.collect_history());

        zones.begin_update(100);
        zones.update_entity(
            1,
            Vec3d::new(5.0, 5.0, 5.0),
            Quatd::IDENTITY,
            &Aabb::around(Vec3d::new(5.0, 5.0, 5.0), 1.0),
        );
        zones.end_update();

        // Comfortably more than one 50 ms collection period.
        std::thread::sleep(std::time::Duration::from_millis(300));
        collector.shutdown();
        assert!(!zones.collect_history());

        let events = listener.events.lock();
        assert!(events.frame_blocks >= 1);
        assert_eq!(events.frames, vec![100]);
    }

    #[test]
    fn removed_listeners_stop_receiving() {
        let grid = ZoneGrid::cube(32);
        let zones = Arc::new(ZoneManager::new(grid));
        let collector = StateCollector::new(Arc::clone(&zones));
        zones.set_collect_history(true);

        let key = ZoneKey::new(grid, 0, 0, 0);
        let listener = Arc::new(RecordingListener::new(vec![key]));
        let dyn_listener: Arc<dyn StateListener> = listener.clone();
        collector.add_listener(dyn_listener.clone());

        zones.begin_update(100);
        zones.update_entity(
            1,
            Vec3d::new(5.0, 5.0, 5.0),
            Quatd::IDENTITY,
            &Aabb::around(Vec3d::new(5.0, 5.0, 5.0), 1.0),
        );
        zones.end_update();
        collector.collect_once();

        collector.remove_listener(&dyn_listener);

        zones.begin_update(200);
        zones.update_entity(
            1,
            Vec3d::new(6.0, 5.0, 5.0),
            Quatd::IDENTITY,
            &Aabb::around(Vec3d::new(6.0, 5.0, 5.0), 1.0),
        );
        zones.end_update();
        collector.collect_once();

        let events = listener.events.lock();
        assert_eq!(events.frames, vec![100]);
        assert_eq!(events.blocks, 1);
    }
}
