//! One replicated object as a participant sees it: the latest applied
//! state, the last mutually-confirmed baseline, and the zone it lives
//! in.

use log::{debug, error, warn};

use crate::local_zone_index::LocalZoneIndex;
use crate::math::{Quatd, Vec3d};
use crate::protocol::ObjectStateProtocol;
use crate::state::ObjectState;
use crate::zone::ZoneKey;

/// Outcome of [`SharedObject::update_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineUpdate {
    /// First baseline for this object. `repaired` is set when the state
    /// carried no real id and it was force-copied from the current
    /// state, a condition observed under severe ack lag.
    Initialized { repaired: bool },
    /// The delta was applied on top of the existing baseline.
    Applied,
    /// The sequence was older than the baseline; nothing changed.
    Stale,
}

/// Outcome of [`SharedObject::apply_network_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectChange {
    /// The state was older than what we already had.
    Stale,
    /// The object changed and is live.
    Updated,
    /// The object transitioned to removed with this state.
    Removed,
    /// The object is removed and listeners were already told.
    StillRemoved,
}

/// A replicated object's current/baseline pair.
///
/// On the server the version is frame time; on the client it is the
/// frame sequence from the wire. The baseline only ever advances, and an
/// object is discarded only when both views carry the removal sentinel —
/// removal that has not been mutually acknowledged is never forgotten.
#[derive(Debug, Clone)]
pub struct SharedObject {
    version: i64,
    current: ObjectState,
    baseline_version: i64,
    baseline: Option<ObjectState>,
    zone: Option<ZoneKey>,
    // The client may keep receiving updates for a removed object; this
    // records that listeners have already been told, so the removal is
    // reported exactly once per transition.
    notified_removed: bool,
}

impl SharedObject {
    pub fn new(network_id: u16, real_id: Option<u64>) -> Self {
        Self {
            version: 0,
            current: ObjectState::with_real_id(network_id, real_id),
            baseline_version: 0,
            baseline: None,
            zone: None,
            notified_removed: false,
        }
    }

    pub fn network_id(&self) -> u16 {
        self.current.network_id
    }

    pub fn entity_id(&self) -> Option<u64> {
        self.current.real_id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.current.parent_id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn current(&self) -> &ObjectState {
        &self.current
    }

    pub fn baseline(&self) -> Option<&ObjectState> {
        self.baseline.as_ref()
    }

    pub fn zone(&self) -> Option<&ZoneKey> {
        self.zone.as_ref()
    }

    /// The delta against the baseline, which is the whole state while no
    /// baseline exists.
    pub fn delta(&self) -> ObjectState {
        self.current.delta_from(self.baseline.as_ref())
    }

    /// The current position in world space: zone-relative positions are
    /// translated through the zone origin, parent-relative ones are
    /// returned as-is.
    pub fn world_position(&self, protocol: &ObjectStateProtocol) -> Option<Vec3d> {
        let local = protocol.position(&self.current)?;
        if self.current.parent_id.is_none() {
            Some(self.zone?.to_world(local))
        } else {
            Some(local)
        }
    }

    pub fn world_rotation(&self, protocol: &ObjectStateProtocol) -> Option<Quatd> {
        protocol.rotation(&self.current)
    }

    pub fn is_marked_removed(&self) -> bool {
        self.current.is_marked_removed()
    }

    /// True only when both the current view and the baseline carry the
    /// removal sentinel, i.e. the removal is mutually acknowledged.
    pub fn is_fully_marked_removed(&self) -> bool {
        match &self.baseline {
            None => false,
            Some(baseline) => baseline.is_marked_removed() && self.current.is_marked_removed(),
        }
    }

    /// Marks the current view removed, unless a newer update has already
    /// been seen. A removal notice from one zone must not clobber a
    /// later update from another.
    pub fn mark_removed(&mut self, time: i64) {
        if time > self.version {
            self.current.mark_removed();
        }
    }

    /// Server-side ingest of an authoritative pose. Only advances when
    /// `time` is newer than the current version; the same object can be
    /// reported by several overlapping zones in one frame and only the
    /// first wins.
    ///
    /// `pos` is world-space and stored zone-local unless the object is
    /// parented, in which case it is already parent-relative.
    pub fn update_state(
        &mut self,
        time: i64,
        zone: ZoneKey,
        zone_id: u32,
        parent_id: Option<u64>,
        pos: Vec3d,
        rot: Quatd,
        protocol: &ObjectStateProtocol,
    ) -> bool {
        if time <= self.version {
            return false;
        }

        if self.current.is_marked_removed() {
            // Removed in one zone, now active again in another.
            debug!("unremoving: {:?}", self.current.real_id);
        }

        self.version = time;
        self.zone = Some(zone);
        self.current.zone_id = Some(zone_id);
        self.current.parent_id = parent_id;

        let local_pos = if parent_id.is_none() {
            zone.to_local(pos)
        } else {
            pos
        };
        protocol.set_position(&mut self.current, local_pos);
        protocol.set_rotation(&mut self.current, rot);

        true
    }

    /// Promotes an acknowledged state into the baseline. `sequence` is
    /// the frame time of the acknowledged frame; stale sequences are
    /// ignored so out-of-order double-acks stay idempotent.
    pub fn update_baseline(&mut self, sequence: i64, state: &ObjectState) -> BaselineUpdate {
        let Some(baseline) = &mut self.baseline else {
            let mut baseline = state.clone();
            let mut repaired = false;
            if baseline.real_id.is_none() {
                // Observed under severe ack lag: the baseline that
                // carried the real id was skipped somewhere. Repair from
                // the current state, which never changes its real id,
                // and surface the event through stats.
                warn!(
                    "initial baseline contains no real id, network id: {}, current real id: {:?}",
                    state.network_id, self.current.real_id
                );
                baseline.real_id = self.current.real_id;
                repaired = true;
            }
            self.baseline = Some(baseline);
            self.baseline_version = sequence;
            return BaselineUpdate::Initialized { repaired };
        };

        if self.baseline_version > sequence {
            return BaselineUpdate::Stale;
        }

        self.baseline_version = sequence;
        baseline.apply_delta(state);
        BaselineUpdate::Applied
    }

    /// Client-side merge of an inbound delta: reset to the baseline,
    /// apply the delta on top, and re-resolve the zone key through the
    /// window the frame was built against.
    pub fn apply_network_state(
        &mut self,
        sequence: i64,
        state: &ObjectState,
        zone_index: &LocalZoneIndex,
    ) -> ObjectChange {
        if self.version > sequence {
            debug!("already have newer state for: {:?}", self.current.real_id);
            return ObjectChange::Stale;
        }

        self.version = sequence;

        // Whatever the delta leaves unset falls back to baseline, so the
        // easy merge is baseline + delta.
        if let Some(baseline) = &self.baseline {
            self.current = baseline.clone();
        }
        self.current.apply_delta(state);

        if self.current.zone_id.is_none() || self.current.real_id.is_none() {
            error!(
                "incomplete state after merge, baseline: {:?}, current: {:?}, update: {:?}",
                self.baseline, self.current, state
            );
        }

        match self.current.zone_id {
            Some(zone_id) => {
                // The removal sentinel resolves to no zone; keep the last
                // known key in that case.
                self.zone = zone_index.zone(zone_id).or(self.zone);
            }
            None => warn!("no zone id set for object: {:?}", self.current.real_id),
        }

        if !self.is_marked_removed() {
            // Listeners may have been told this object was removed; it
            // is live again.
            self.notified_removed = false;
            ObjectChange::Updated
        } else if !self.notified_removed {
            self.notified_removed = true;
            ObjectChange::Removed
        } else {
            ObjectChange::StillRemoved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{QuatBits, Vec3Bits};
    use crate::zone::ZoneGrid;

    fn protocol() -> ObjectStateProtocol {
        ObjectStateProtocol::new(8, 64, Vec3Bits::new(-10.0, 42.0, 16), QuatBits::new(12))
    }

    fn zone_key() -> ZoneKey {
        ZoneKey::new(ZoneGrid::cube(32), 0, 0, 0)
    }

    #[test]
    fn update_state_only_advances() {
        let protocol = protocol();
        let mut obj = SharedObject::new(1, Some(7));

        assert!(obj.update_state(
            100,
            zone_key(),
            1,
            None,
            Vec3d::new(5.0, 0.0, 5.0),
            Quatd::IDENTITY,
            &protocol,
        ));
        // A second report of the same frame, e.g. from an overlapping
        // zone, is ignored.
        assert!(!obj.update_state(
            100,
            zone_key(),
            2,
            None,
            Vec3d::new(6.0, 0.0, 6.0),
            Quatd::IDENTITY,
            &protocol,
        ));
        assert_eq!(obj.version(), 100);
        assert_eq!(obj.current().zone_id, Some(1));
    }

    #[test]
    fn world_position_translates_through_zone() {
        let protocol = protocol();
        let mut obj = SharedObject::new(1, Some(7));
        let key = ZoneKey::new(ZoneGrid::cube(32), 1, 0, 0);
        obj.update_state(
            100,
            key,
            1,
            None,
            Vec3d::new(37.0, 0.0, 5.0),
            Quatd::IDENTITY,
            &protocol,
        );

        let world = obj.world_position(&protocol).unwrap();
        let tolerance = 52.0 / 65535.0;
        assert!((world.x - 37.0).abs() <= tolerance);
        assert!((world.z - 5.0).abs() <= tolerance);
    }

    #[test]
    fn delta_shrinks_once_baseline_confirmed() {
        let protocol = protocol();
        let mut obj = SharedObject::new(1, Some(7));
        obj.update_state(
            100,
            zone_key(),
            1,
            None,
            Vec3d::new(5.0, 0.0, 5.0),
            Quatd::IDENTITY,
            &protocol,
        );

        // No baseline: the delta is the full state.
        let full = obj.delta();
        assert!(full.real_id.is_some());
        assert!(full.position_bits.is_some());

        obj.update_baseline(100, &full);

        // Identical state now suppresses to just the id.
        let suppressed = obj.delta();
        assert_eq!(suppressed, ObjectState::new(1));
    }

    #[test]
    fn baseline_updates_are_idempotent_and_ordered() {
        let mut obj = SharedObject::new(1, Some(7));
        let mut state = ObjectState::with_real_id(1, Some(7));
        state.zone_id = Some(3);

        assert_eq!(
            obj.update_baseline(100, &state),
            BaselineUpdate::Initialized { repaired: false }
        );

        let mut newer = ObjectState::new(1);
        newer.zone_id = Some(4);
        assert_eq!(obj.update_baseline(150, &newer), BaselineUpdate::Applied);
        assert_eq!(obj.baseline().unwrap().zone_id, Some(4));

        // An out-of-order double-ack for an older message is ignored.
        let mut older = ObjectState::new(1);
        older.zone_id = Some(9);
        assert_eq!(obj.update_baseline(120, &older), BaselineUpdate::Stale);
        assert_eq!(obj.baseline().unwrap().zone_id, Some(4));
    }

    #[test]
    fn missing_real_id_baseline_is_repaired() {
        let mut obj = SharedObject::new(1, Some(7));
        let state = ObjectState::new(1);
        assert_eq!(
            obj.update_baseline(100, &state),
            BaselineUpdate::Initialized { repaired: true }
        );
        assert_eq!(obj.baseline().unwrap().real_id, Some(7));
    }

    #[test]
    fn removal_is_fully_marked_only_when_mutual() {
        let mut obj = SharedObject::new(1, Some(7));
        let mut live = ObjectState::with_real_id(1, Some(7));
        live.zone_id = Some(3);
        obj.update_baseline(100, &live);

        obj.mark_removed(200);
        assert!(obj.is_marked_removed());
        assert!(!obj.is_fully_marked_removed());

        let mut removed = ObjectState::new(1);
        removed.mark_removed();
        obj.update_baseline(200, &removed);
        assert!(obj.is_fully_marked_removed());
    }

    #[test]
    fn apply_network_state_notifies_removal_once() {
        let mut zone_index = LocalZoneIndex::new(ZoneGrid::cube(32), 1);
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        zone_index.set_center(zone_key(), &mut entered, &mut exited);

        let mut obj = SharedObject::new(1, Some(7));
        let mut live = ObjectState::with_real_id(1, Some(7));
        live.zone_id = Some(5);
        assert_eq!(
            obj.apply_network_state(100, &live, &zone_index),
            ObjectChange::Updated
        );

        let mut removed = ObjectState::new(1);
        removed.mark_removed();
        assert_eq!(
            obj.apply_network_state(150, &removed, &zone_index),
            ObjectChange::Removed
        );
        assert_eq!(
            obj.apply_network_state(200, &removed, &zone_index),
            ObjectChange::StillRemoved
        );

        // And exactly once again after it comes back.
        let mut back = ObjectState::new(1);
        back.zone_id = Some(5);
        assert_eq!(
            obj.apply_network_state(250, &back, &zone_index),
            ObjectChange::Updated
        );
        let mut gone = ObjectState::new(1);
        gone.mark_removed();
        assert_eq!(
            obj.apply_network_state(300, &gone, &zone_index),
            ObjectChange::Removed
        );
    }

    #[test]
    fn stale_network_state_is_skipped() {
        let zone_index = LocalZoneIndex::new(ZoneGrid::cube(32), 1);
        let mut obj = SharedObject::new(1, Some(7));
        let mut live = ObjectState::with_real_id(1, Some(7));
        live.zone_id = Some(5);
        obj.apply_network_state(100, &live, &zone_index);
        assert_eq!(
            obj.apply_network_state(50, &live, &zone_index),
            ObjectChange::Stale
        );
        assert_eq!(obj.version(), 100);
    }
}
