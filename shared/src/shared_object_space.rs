//! The per-participant table of replicated objects, keyed by network
//! id. The space owns its objects outright and performs listener
//! notification itself; objects never call back into it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::local_zone_index::LocalZoneIndex;
use crate::protocol::ObjectStateProtocol;
use crate::shared_object::{BaselineUpdate, ObjectChange, SharedObject};
use crate::state::{FrameState, ObjectState};
use crate::stats::ConnectionStats;

/// Observes object lifecycle on the client: one `object_updated` or
/// `object_removed` per applied change, bracketed by frame begin/end.
pub trait SharedObjectListener: Send + Sync {
    fn begin_frame(&self, time: i64);
    fn object_updated(&self, object: &SharedObject);
    fn object_removed(&self, object: &SharedObject);
    fn end_frame(&self);
}

/// The object table plus the frame-scoped listener fan-out.
pub struct SharedObjectSpace {
    protocol: ObjectStateProtocol,
    stats: Arc<ConnectionStats>,
    objects: HashMap<u16, SharedObject>,
    listeners: Vec<Arc<dyn SharedObjectListener>>,
}

impl SharedObjectSpace {
    pub fn new(protocol: ObjectStateProtocol) -> Self {
        Self::with_stats(protocol, Arc::new(ConnectionStats::new()))
    }

    pub fn with_stats(protocol: ObjectStateProtocol, stats: Arc<ConnectionStats>) -> Self {
        Self {
            protocol,
            stats,
            objects: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn protocol(&self) -> &ObjectStateProtocol {
        &self.protocol
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Fetches an object, creating it on first observation.
    pub fn get_or_create(&mut self, network_id: u16, real_id: Option<u64>) -> &mut SharedObject {
        self.objects
            .entry(network_id)
            .or_insert_with(|| SharedObject::new(network_id, real_id))
    }

    pub fn get(&self, network_id: u16) -> Option<&SharedObject> {
        self.objects.get(&network_id)
    }

    pub fn get_mut(&mut self, network_id: u16) -> Option<&mut SharedObject> {
        self.objects.get_mut(&network_id)
    }

    pub fn remove(&mut self, network_id: u16) -> Option<SharedObject> {
        self.objects.remove(&network_id)
    }

    pub fn network_ids(&self) -> Vec<u16> {
        self.objects.keys().copied().collect()
    }

    pub fn objects(&self) -> impl Iterator<Item = &SharedObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SharedObjectListener>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn SharedObjectListener>) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn begin_frame(&self, time: i64) {
        for listener in &self.listeners {
            listener.begin_frame(time);
        }
    }

    pub fn end_frame(&self) {
        for listener in &self.listeners {
            listener.end_frame();
        }
    }

    /// Applies an inbound delta to the identified object and notifies
    /// listeners about the resulting transition. Returns what happened
    /// so the caller can evict fully-removed objects.
    pub fn apply_network_state(
        &mut self,
        network_id: u16,
        time: i64,
        state: &ObjectState,
        zone_index: &LocalZoneIndex,
    ) -> Option<ObjectChange> {
        let object = self.objects.get_mut(&network_id)?;
        let change = object.apply_network_state(time, state, zone_index);

        let object = &self.objects[&network_id];
        match change {
            ObjectChange::Updated => {
                for listener in &self.listeners {
                    listener.object_updated(object);
                }
            }
            ObjectChange::Removed => {
                for listener in &self.listeners {
                    listener.object_removed(object);
                }
            }
            ObjectChange::Stale | ObjectChange::StillRemoved => {}
        }
        Some(change)
    }

    /// Promotes every state in the acknowledged frames to the baseline.
    /// Duplicate and reordered acknowledgements are absorbed by the
    /// per-object sequence check, so this is idempotent.
    pub fn update_baseline(&mut self, frames: &[FrameState]) {
        for frame in frames {
            for state in &frame.states {
                // Duplicate state for objects we no longer track is
                // normal; skip it.
                let Some(object) = self.objects.get_mut(&state.network_id) else {
                    continue;
                };
                if let BaselineUpdate::Initialized { repaired: true } =
                    object.update_baseline(frame.time, state)
                {
                    self.stats.increment_baseline_repairs();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{QuatBits, Vec3Bits};
    use crate::math::{Quatd, Vec3d};
    use crate::state::ObjectState;
    use crate::zone::{ZoneGrid, ZoneKey};

    fn protocol() -> ObjectStateProtocol {
        ObjectStateProtocol::new(8, 64, Vec3Bits::new(-10.0, 42.0, 16), QuatBits::new(12))
    }

    fn frame_with(time: i64, state: ObjectState) -> FrameState {
        let mut frame = FrameState::new(time, 0, -1);
        frame.add_state(state, &protocol());
        frame
    }

    #[test]
    fn objects_are_created_on_first_observation() {
        let mut space = SharedObjectSpace::new(protocol());
        space.get_or_create(1, Some(7));
        assert_eq!(space.len(), 1);
        assert_eq!(space.get(1).unwrap().entity_id(), Some(7));

        // Subsequent fetches reuse it.
        space.get_or_create(1, Some(999));
        assert_eq!(space.get(1).unwrap().entity_id(), Some(7));
    }

    #[test]
    fn update_baseline_skips_unknown_objects() {
        let mut space = SharedObjectSpace::new(protocol());
        let mut state = ObjectState::with_real_id(5, Some(50));
        state.zone_id = Some(2);
        // No object with network id 5: duplicate state, absorbed.
        space.update_baseline(&[frame_with(100, state)]);
        assert!(space.is_empty());
    }

    #[test]
    fn update_baseline_counts_repairs() {
        let mut space = SharedObjectSpace::new(protocol());
        let protocol = *space.protocol();
        let obj = space.get_or_create(1, Some(7));
        obj.update_state(
            50,
            ZoneKey::new(ZoneGrid::cube(32), 0, 0, 0),
            1,
            None,
            Vec3d::ZERO,
            Quatd::IDENTITY,
            &protocol,
        );

        // Initial baseline with no real id forces the repair path.
        let mut bare = ObjectState::new(1);
        bare.zone_id = Some(1);
        space.update_baseline(&[frame_with(100, bare)]);
        assert_eq!(space.stats().baseline_repairs(), 1);
        assert_eq!(space.get(1).unwrap().baseline().unwrap().real_id, Some(7));
    }

    #[test]
    fn baseline_promotion_is_idempotent() {
        let mut space = SharedObjectSpace::new(protocol());
        space.get_or_create(1, Some(7));

        let mut state = ObjectState::with_real_id(1, Some(7));
        state.zone_id = Some(3);
        let frames = vec![frame_with(100, state)];

        space.update_baseline(&frames);
        let first = space.get(1).unwrap().baseline().cloned();
        space.update_baseline(&frames);
        assert_eq!(space.get(1).unwrap().baseline().cloned(), first);
    }
}
