//! Cross-cell frame lifecycle: classifies per-frame object poses into
//! zones, tracks each object's cell range, retains a short history, and
//! hands off bounded batches of frames to the collector.

use std::collections::{HashMap, HashSet};

use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use zonecast_shared::{Aabb, Quatd, Vec3d, Vec3i, ZoneGrid, ZoneKey};

use crate::zone::{StateFrame, Zone};

/// Default number of frames the manager can hold between purges.
pub const DEFAULT_HISTORY_BACKLOG: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct ZoneManagerConfig {
    /// Frames retained between collector purges; one more frame than
    /// this fits triggers backpressure (the frame is dropped with a
    /// warning).
    pub history_backlog: usize,
    /// Selects the dynamic zone-range tracker, which supports objects of
    /// any extent. The default compact tracker covers at most two cells
    /// per axis.
    pub dynamic_ranges: bool,
}

impl Default for ZoneManagerConfig {
    fn default() -> Self {
        Self {
            history_backlog: DEFAULT_HISTORY_BACKLOG,
            dynamic_ranges: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeKind {
    /// 2x2x2 corner tracking; extents beyond two cells per axis are
    /// clamped with an error.
    Oct,
    /// Full-box tracking of any size.
    Dynamic,
}

/// The axis-aligned box of zone coordinates one object currently
/// intersects, with the key set it expands to and the last known pose
/// for no-change replays.
#[derive(Debug)]
struct ZoneRange {
    kind: RangeKind,
    bounds: Option<(Vec3i, Vec3i)>,
    keys: Vec<ZoneKey>,
    last_pose: Option<(Vec3d, Quatd)>,
}

fn box_contains(bounds: &(Vec3i, Vec3i), key: &ZoneKey) -> bool {
    let (min, max) = bounds;
    key.x >= min.x
        && key.x <= max.x
        && key.y >= min.y
        && key.y <= max.y
        && key.z >= min.z
        && key.z <= max.z
}

impl ZoneRange {
    fn new(kind: RangeKind) -> Self {
        Self {
            kind,
            bounds: None,
            keys: Vec::new(),
            last_pose: None,
        }
    }

    fn keys(&self) -> &[ZoneKey] {
        &self.keys
    }

    fn compute_keys(&self, grid: &ZoneGrid, min: Vec3i, max: Vec3i) -> Vec<ZoneKey> {
        match self.kind {
            RangeKind::Oct => {
                let xs = if min.x == max.x {
                    vec![min.x]
                } else {
                    vec![min.x, max.x]
                };
                let ys = if min.y == max.y {
                    vec![min.y]
                } else {
                    vec![min.y, max.y]
                };
                let zs = if min.z == max.z {
                    vec![min.z]
                } else {
                    vec![min.z, max.z]
                };
                let mut keys = Vec::with_capacity(xs.len() * ys.len() * zs.len());
                for &y in &ys {
                    for &z in &zs {
                        for &x in &xs {
                            keys.push(ZoneKey::new(*grid, x, y, z));
                        }
                    }
                }
                keys
            }
            RangeKind::Dynamic => {
                let mut keys = Vec::new();
                for y in min.y..=max.y {
                    for z in min.z..=max.z {
                        for x in min.x..=max.x {
                            keys.push(ZoneKey::new(*grid, x, y, z));
                        }
                    }
                }
                keys
            }
        }
    }

    /// Replaces the tracked box, returning the cells entered and left.
    fn set_range(
        &mut self,
        grid: &ZoneGrid,
        new_min: Vec3i,
        mut new_max: Vec3i,
    ) -> (Vec<ZoneKey>, Vec<ZoneKey>) {
        if self.kind == RangeKind::Oct {
            // The compact tracker only covers the corner cells; a larger
            // object would silently lose coverage in the middle.
            if new_max.x - new_min.x > 1 || new_max.y - new_min.y > 1 || new_max.z - new_min.z > 1 {
                error!(
                    "object spans more than two cells per axis, clamping: {new_min:?}..{new_max:?}"
                );
                new_max.x = new_max.x.min(new_min.x + 1);
                new_max.y = new_max.y.min(new_min.y + 1);
                new_max.z = new_max.z.min(new_min.z + 1);
            }
        }

        let new_keys = self.compute_keys(grid, new_min, new_max);
        let new_bounds = (new_min, new_max);

        let (entered, exited) = match &self.bounds {
            None => (new_keys.clone(), Vec::new()),
            Some(old_bounds) => {
                let entered: Vec<ZoneKey> = new_keys
                    .iter()
                    .filter(|k| !box_contains(old_bounds, k))
                    .copied()
                    .collect();
                let exited: Vec<ZoneKey> = self
                    .keys
                    .iter()
                    .filter(|k| !box_contains(&new_bounds, k))
                    .copied()
                    .collect();
                (entered, exited)
            }
        };

        self.bounds = Some(new_bounds);
        self.keys = new_keys;
        (entered, exited)
    }
}

#[derive(Debug)]
struct Inner {
    grid: ZoneGrid,
    config: ZoneManagerConfig,
    index: HashMap<u64, ZoneRange>,
    // Ids that received no update this frame; their last pose is
    // replayed at end_update so receivers get a heartbeat.
    no_updates: HashSet<u64>,
    update_time: Option<i64>,
    zones: HashMap<ZoneKey, Zone>,
    pending_removal: HashSet<u64>,
    collect_history: bool,
    history_times: Vec<i64>,
}

impl Inner {
    fn get_zone_mut(&mut self, key: &ZoneKey, create: bool) -> Option<&mut Zone> {
        if create && !self.zones.contains_key(key) {
            let mut zone = Zone::new(*key, self.config.history_backlog);
            if let Some(time) = self.update_time {
                zone.begin_update(time);
            }
            self.zones.insert(*key, zone);
        }
        self.zones.get_mut(key)
    }

    fn enter_zone(&mut self, id: u64, key: &ZoneKey) {
        debug!("enter zone: {id} {key}");
        let zone = self
            .get_zone_mut(key, true)
            .expect("zone exists after create");
        zone.add_child(id);
    }

    fn leave_zone(&mut self, id: u64, key: &ZoneKey) {
        debug!("leave zone: {id} {key}");
        let Some(zone) = self.get_zone_mut(key, false) else {
            warn!("object {id} is leaving zone that does not exist: {key}");
            return;
        };
        zone.remove_child(id);
        // The zone cannot be removed until it is both empty and devoid
        // of state; commit_update handles that.
    }

    fn update_zone_object(
        &mut self,
        id: u64,
        parent: Option<u64>,
        pos: Vec3d,
        rot: Quatd,
        key: &ZoneKey,
    ) {
        let Some(zone) = self.get_zone_mut(key, false) else {
            warn!("object {id} is updating a zone that does not exist: {key}");
            return;
        };
        zone.update(parent, id, pos, rot);
    }

    fn send_update(&mut self, id: u64, pos: Vec3d, rot: Quatd) {
        let Some(range) = self.index.get(&id) else {
            return;
        };
        let keys: Vec<ZoneKey> = range.keys().to_vec();
        for key in &keys {
            self.update_zone_object(id, None, pos, rot, key);
        }
    }

    fn deactivate(&mut self, id: u64) {
        let Some(range) = self.index.remove(&id) else {
            return;
        };
        debug!("range: {range:?}");
        for key in range.keys().to_vec() {
            self.leave_zone(id, &key);
        }
    }

    fn begin_update(&mut self, time: i64) {
        trace!("begin_update({time})");
        self.update_time = Some(time);

        // Seed the no-update set with every known id minus the pending
        // removals.
        self.no_updates = self
            .index
            .keys()
            .filter(|id| !self.pending_removal.contains(id))
            .copied()
            .collect();

        for zone in self.zones.values_mut() {
            zone.begin_update(time);
        }

        // Apply the removals deferred while outside a frame, now that
        // the zones have open blocks to record them in.
        let pending: Vec<u64> = self.pending_removal.drain().collect();
        for id in pending {
            debug!("delayed deactivation: {id}");
            self.deactivate(id);
        }
    }

    fn update_entity(&mut self, id: u64, pos: Vec3d, rot: Quatd, bounds: &Aabb) {
        trace!("update_entity({id}, {pos:?})");

        let min_zone = self.grid.world_to_zone(bounds.min);
        let max_zone = self.grid.world_to_zone(bounds.max);

        let kind = if self.config.dynamic_ranges {
            RangeKind::Dynamic
        } else {
            RangeKind::Oct
        };
        let grid = self.grid;
        let range = self.index.entry(id).or_insert_with(|| ZoneRange::new(kind));

        let (entered, exited) = if range.bounds != Some((min_zone, max_zone)) {
            range.set_range(&grid, min_zone, max_zone)
        } else {
            (Vec::new(), Vec::new())
        };
        range.last_pose = Some((pos, rot));

        for key in &entered {
            self.enter_zone(id, key);
        }
        for key in &exited {
            self.leave_zone(id, key);
        }

        self.send_update(id, pos, rot);
        self.no_updates.remove(&id);
    }

    fn warp_entity(&mut self, id: u64) {
        let Some(range) = self.index.get(&id) else {
            warn!("warp for unknown object: {id}");
            return;
        };
        for key in range.keys().to_vec() {
            if let Some(zone) = self.get_zone_mut(&key, false) {
                zone.warp(None, id);
            }
        }
    }

    fn end_update(&mut self) {
        trace!("end_update()");

        // Without history collection a commit would just accumulate
        // blocks nobody purges.
        if !self.collect_history {
            self.update_time = None;
            return;
        }

        // Replay the last pose of everything that moved no zones and got
        // no update, so watchers see a heartbeat.
        let no_updates: Vec<u64> = self.no_updates.drain().collect();
        for id in no_updates {
            let Some(range) = self.index.get(&id) else {
                warn!("no zone range found for no-change id: {id}");
                continue;
            };
            let Some((pos, rot)) = range.last_pose else {
                continue;
            };
            self.send_update(id, pos, rot);
        }

        let Some(update_time) = self.update_time.take() else {
            warn!("end_update() outside a frame");
            return;
        };

        // Be a little more graceful than an index panic when the
        // collector falls behind: drop the frame.
        if self.history_times.len() + 1 >= self.config.history_backlog {
            warn!(
                "pausing history collect, overflow detected, current history size: {} max: {}",
                self.history_times.len(),
                self.config.history_backlog
            );
            return;
        }

        self.history_times.push(update_time);

        self.zones.retain(|key, zone| {
            if !zone.commit_update() && zone.is_empty() {
                debug!("zone no longer active: {key}");
                false
            } else {
                true
            }
        });
    }

    fn purge_state(&mut self) -> Vec<Option<StateFrame>> {
        let times = std::mem::take(&mut self.history_times);
        let mut frames: Vec<Option<StateFrame>> = times.iter().map(|_| None).collect();
        let zone_count = self.zones.len();

        for zone in self.zones.values_mut() {
            let history = zone.purge_history();

            // A zone may have gaps in its history relative to the global
            // frame list; advance through them.
            let mut h = 0;
            for block in history {
                while h < times.len() && times[h] < block.time() {
                    h += 1;
                }
                if h == times.len() || times[h] != block.time() {
                    error!(
                        "state block does not match history index, time: {} history: {times:?}",
                        block.time()
                    );
                    continue;
                }
                frames[h]
                    .get_or_insert_with(|| StateFrame::new(times[h], zone_count))
                    .add(block);
            }
        }

        frames
    }

    fn remove(&mut self, id: u64) {
        debug!("deactivated: {id}");
        if !self.index.contains_key(&id) {
            return;
        }
        if self.update_time.is_none() {
            // Outside a frame update, hold the removal until proper
            // history is set up.
            debug!("pending deactivation: {id}");
            self.pending_removal.insert(id);
        } else {
            self.deactivate(id);
        }
    }
}

/// The live zone set and per-object range index. Shared between the
/// game thread (frame lifecycle) and the collector thread (purge); one
/// lock covers both, standing in for the original's history write lock.
#[derive(Debug)]
pub struct ZoneManager {
    grid: ZoneGrid,
    inner: Mutex<Inner>,
}

impl ZoneManager {
    pub fn new(grid: ZoneGrid) -> Self {
        Self::with_config(grid, ZoneManagerConfig::default())
    }

    pub fn with_config(grid: ZoneGrid, config: ZoneManagerConfig) -> Self {
        Self {
            grid,
            inner: Mutex::new(Inner {
                grid,
                config,
                index: HashMap::new(),
                no_updates: HashSet::new(),
                update_time: None,
                zones: HashMap::new(),
                pending_removal: HashSet::new(),
                collect_history: false,
                history_times: Vec::new(),
            }),
        }
    }

    pub fn grid(&self) -> ZoneGrid {
        self.grid
    }

    /// While disabled, `end_update` commits nothing so no history
    /// accumulates. The collector enables this on startup and disables
    /// it on shutdown.
    pub fn set_collect_history(&self, collect: bool) {
        self.inner.lock().collect_history = collect;
    }

    pub fn collect_history(&self) -> bool {
        self.inner.lock().collect_history
    }

    /// Opens a frame at `time`, begins an update on every live zone, and
    /// applies removals deferred from outside the frame.
    pub fn begin_update(&self, time: i64) {
        self.inner.lock().begin_update(time);
    }

    /// Classifies the object into the zones its bounds intersect,
    /// emitting enter/leave transitions when the range changed, and
    /// records the pose in every intersected cell.
    pub fn update_entity(&self, id: u64, pos: Vec3d, rot: Quatd, bounds: &Aabb) {
        self.inner.lock().update_entity(id, pos, rot, bounds);
    }

    /// Flags a position discontinuity for the object in every cell it
    /// intersects.
    pub fn warp_entity(&self, id: u64) {
        self.inner.lock().warp_entity(id);
    }

    /// Closes the frame: replays no-change heartbeats, commits every
    /// zone's open block to history, and evicts zones that are empty
    /// and history-free.
    pub fn end_update(&self) {
        self.inner.lock().end_update();
    }

    /// Drains the accumulated history into per-time frames, oldest
    /// first. Entries are None for times where no zone recorded state.
    pub fn purge_state(&self) -> Vec<Option<StateFrame>> {
        self.inner.lock().purge_state()
    }

    /// Re-activates an object whose removal is still pending.
    pub fn add(&self, id: u64) {
        debug!("activated: {id}");
        self.inner.lock().pending_removal.remove(&id);
    }

    /// Removes an object: immediately when inside a frame, deferred to
    /// the next `begin_update` otherwise.
    pub fn remove(&self, id: u64) {
        self.inner.lock().remove(id);
    }

    /// Number of live zones; mostly useful for tests and diagnostics.
    pub fn zone_count(&self) -> usize {
        self.inner.lock().zones.len()
    }
}
